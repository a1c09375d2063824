//! The unified client: one endpoint, the Weather Server proxy.
//!
//! A client sends Type 0 (by coordinates) or Type 2 (by area code) to the
//! proxy and receives a Type 3 either way; Type 4 reports come back as
//! Type 5 ACKs. The per-request packet id is the only correlation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthConfig;
use crate::net::{PacketIdGenerator, ReplyRouter};
use crate::packet::types::location::LocationRequest;
use crate::packet::types::query::{QueryRequest, QueryResponse};
use crate::packet::types::report::{ReportAck, ReportRequest};
use crate::packet::{DataFlags, Frame, PacketType};

use super::{expect_reply, ClientResult};

pub struct WeatherClient {
    router: Arc<ReplyRouter>,
    target: SocketAddr,
    pidg: PacketIdGenerator,
    timeout: Duration,
    auth: AuthConfig,
}

impl WeatherClient {
    pub async fn connect(
        target: SocketAddr,
        buffer_size: usize,
        timeout: Duration,
        auth: AuthConfig,
    ) -> ClientResult<Self> {
        let router = Arc::new(ReplyRouter::bind(buffer_size).await?);
        Ok(Self::new(router, target, timeout, auth))
    }

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

    fn apply_auth(&self, frame: &mut Frame) -> ClientResult<()> {
        if self.auth.is_required_for(frame.header.packet_type as u8) {
            let digest = self
                .auth
                .calculate(frame.header.packet_id, frame.header.timestamp)?;
            frame.ext.set_auth_hash(digest)?;
            frame.header.request_auth = true;
        }
        Ok(())
    }

    async fn round_trip(&self, frame: &Frame, expected: PacketType) -> ClientResult<Frame> {
        let wire = frame.encode()?;
        let reply = self
            .router
            .request(&wire, self.target, frame.header.packet_id, self.timeout)
            .await?;
        expect_reply(&reply, expected)
    }

    /// Weather by coordinates: Type 0 in, Type 3 out.
    pub async fn get_weather_by_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
        flags: DataFlags,
        day: u8,
    ) -> ClientResult<QueryResponse> {
        let packet_id = self.pidg.next_id();
        let mut request = LocationRequest::new(packet_id, latitude, longitude, flags, day)?;
        self.apply_auth(request.frame_mut())?;
        let reply = self
            .round_trip(request.frame(), PacketType::QueryResponse)
            .await?;
        Ok(QueryResponse::from_frame(reply)?)
    }

    /// Weather by area code: Type 2 in, Type 3 out.
    pub async fn get_weather_by_area(
        &self,
        area_code: u32,
        flags: DataFlags,
        day: u8,
    ) -> ClientResult<QueryResponse> {
        let packet_id = self.pidg.next_id();
        let mut request = QueryRequest::new(packet_id, area_code, flags, day);
        self.apply_auth(request.frame_mut())?;
        let reply = self
            .round_trip(request.frame(), PacketType::QueryResponse)
            .await?;
        Ok(QueryResponse::from_frame(reply)?)
    }

    /// Sensor report through the proxy: Type 4 in, Type 5 out.
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
        self.apply_auth(request.frame_mut())?;
        let reply = self
            .round_trip(request.frame(), PacketType::ReportAck)
            .await?;
        Ok(ReportAck::from_frame(reply)?)
    }
}
