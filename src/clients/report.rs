//! Client stub for the Report Server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthConfig;
use crate::net::{PacketIdGenerator, ReplyRouter};
use crate::packet::types::report::{ReportAck, ReportRequest};
use crate::packet::PacketType;

use super::{expect_reply, ClientResult};

pub struct ReportClient {
    router: Arc<ReplyRouter>,
    target: SocketAddr,
    pidg: PacketIdGenerator,
    timeout: Duration,
    auth: AuthConfig,
}

impl ReportClient {
    pub fn new(
        router: Arc<ReplyRouter>,
        target: SocketAddr,
        timeout: Duration,
        auth: AuthConfig,
    ) -> Self {
        Self {
            router,
            target,
            pidg: PacketIdGenerator::new(),
            timeout,
            auth,
        }
    }

    /// Submit one sensor report and wait for the Type 5 acknowledgement.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_report(
        &self,
        area_code: u32,
        weather_code: Option<u16>,
        temperature_c: Option<i16>,
        pop: Option<u8>,
        alerts: &[String],
        disasters: &[String],
    ) -> ClientResult<ReportAck> {
        let packet_id = self.pidg.next_id();
        let mut request = ReportRequest::new(
            packet_id,
            area_code,
            weather_code,
            temperature_c,
            pop,
            alerts,
            disasters,
        )?;
        if self.auth.is_required_for(PacketType::ReportRequest as u8) {
            let header = request.frame().header;
            let digest = self.auth.calculate(header.packet_id, header.timestamp)?;
            request.frame_mut().ext.set_auth_hash(digest)?;
            request.frame_mut().header.request_auth = true;
        }

        let wire = request.encode()?;
        let reply = self
            .router
            .request(&wire, self.target, packet_id, self.timeout)
            .await?;
        let frame = expect_reply(&reply, PacketType::ReportAck)?;
        Ok(ReportAck::from_frame(frame)?)
    }
}
