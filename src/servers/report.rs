//! The Report Server: Type 4 in, Type 5 out.
//!
//! Extracts the sensor tuple from each report, appends one JSON record to
//! the area's log file, and acknowledges with the same packet id and area.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::auth::AuthConfig;
use crate::net::{HandlerError, PacketHandler, RequestContext};
use crate::packet::types::error_response::codes;
use crate::packet::types::report::{ReportAck, ReportRequest};
use crate::packet::{Frame, PacketType};
use crate::stores::reports::{AppendOutcome, ReportLog, SensorReport};

pub struct ReportServer {
    log: Arc<ReportLog>,
    auth: AuthConfig,
}

impl ReportServer {
    pub fn new(log: Arc<ReportLog>) -> Self {
        Self {
            log,
            auth: AuthConfig::disabled(),
        }
    }

    /// Sign outgoing ACKs under this configuration when it protects Type 5.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    fn extract(request: &ReportRequest, ctx: &RequestContext) -> SensorReport {
        let frame = request.frame();
        SensorReport {
            packet_id: frame.header.packet_id,
            area_code: frame.header.area_code_str(),
            timestamp: frame.header.timestamp,
            weather_code: request.weather_code(),
            temperature: request.temperature_c(),
            precipitation_prob: request.pop(),
            alerts: request.alerts(),
            disasters: request.disasters(),
            source: frame
                .ext
                .source()
                .map(|s| s.to_string())
                .or_else(|| Some(ctx.peer.to_string())),
        }
    }
}

#[async_trait]
impl PacketHandler for ReportServer {
    fn name(&self) -> &'static str {
        "report_server"
    }

    fn accepts(&self, packet_type: PacketType) -> bool {
        packet_type == PacketType::ReportRequest
    }

    async fn handle(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError> {
        let request =
            ReportRequest::from_frame(frame).map_err(|e| HandlerError::internal(e.to_string()))?;
        let report = Self::extract(&request, ctx);
        let area_code = report.area_code.clone();

        let outcome = self
            .log
            .append(report)
            .await
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        match outcome {
            AppendOutcome::Created => info!("first report for area {area_code}"),
            AppendOutcome::Updated => debug!("appended report for area {area_code}"),
        }

        let mut ack = ReportAck::for_request(request.frame())
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        if self.auth.is_required_for(PacketType::ReportAck as u8) {
            let header = ack.frame().header;
            let digest = self
                .auth
                .calculate(header.packet_id, header.timestamp)
                .map_err(|e| HandlerError::new(codes::AUTH, e.to_string()))?;
            ack.frame_mut()
                .ext
                .set_auth_hash(digest)
                .map_err(|e| HandlerError::internal(e.to_string()))?;
            ack.frame_mut().header.response_auth = true;
        }
        let wire = ack
            .encode()
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        ctx.send_to(&wire, ctx.peer).await
    }
}
