//! The Weather Server: the proxy every client talks to.
//!
//! Demultiplexes by packet type. Requests gain a `source` record naming the
//! original client before they are forwarded, so the matching response can
//! be routed home without any server-side correlation table; responses have
//! the record stripped on the return leg. Two cache short-circuits answer
//! locally when possible: coordinate -> area (the location client's cache)
//! and fingerprint -> weather (the query client's cache).

use std::env;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::auth::AuthConfig;
use crate::clients::{LocationClient, QueryClient};
use crate::config::{Endpoint, ServerConfig};
use crate::net::{HandlerError, PacketHandler, ReplyRouter, RequestContext};
use crate::packet::types::error_response::codes;
use crate::packet::types::query::{QueryRequest, QueryResponse, WeatherAnswer};
use crate::packet::{ExtKey, Frame, PacketType};

/// Authentication material for each downstream hop. The proxy signs a
/// forwarded packet under the passphrase of the hop it goes to.
#[derive(Debug, Clone, Default)]
pub struct BackendAuth {
    pub location: AuthConfig,
    pub query: AuthConfig,
    pub report: AuthConfig,
}

impl BackendAuth {
    /// Read the per-hop settings from the environment
    /// (`LOCATION_SERVER_AUTH_ENABLED`, `QUERY_SERVER_PASSPHRASE`, ...).
    pub fn from_env() -> Self {
        Self {
            location: hop_auth_from_env("LOCATION_SERVER"),
            query: hop_auth_from_env("QUERY_SERVER"),
            report: hop_auth_from_env("REPORT_SERVER"),
        }
    }
}

fn hop_auth_from_env(prefix: &str) -> AuthConfig {
    let enabled = env::var(format!("{prefix}_AUTH_ENABLED"))
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    let passphrase = env::var(format!("{prefix}_PASSPHRASE"))
        .ok()
        .filter(|v| !v.is_empty());
    let algorithm = env::var("HASH_ALGORITHM")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    AuthConfig {
        enabled,
        passphrase,
        algorithm,
        ..AuthConfig::default()
    }
}

fn resolve(endpoint: &Endpoint) -> io::Result<SocketAddr> {
    (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("cannot resolve {endpoint}"),
            )
        })
}

pub struct WeatherProxy {
    version: u8,
    location_addr: SocketAddr,
    query_addr: SocketAddr,
    report_addr: SocketAddr,
    location_client: LocationClient,
    query_client: QueryClient,
    auth: BackendAuth,
}

impl WeatherProxy {
    pub async fn new(config: &ServerConfig, auth: BackendAuth) -> io::Result<Self> {
        let location_addr = resolve(&config.location_server)?;
        let query_addr = resolve(&config.query_server)?;
        let report_addr = resolve(&config.report_server)?;
        info!(
            "proxy backends: location={location_addr} query={query_addr} report={report_addr}"
        );

        let router = Arc::new(ReplyRouter::bind(config.udp_buffer_size).await?);
        let location_client = LocationClient::new(
            router.clone(),
            location_addr,
            config.coordinate_cache_ttl,
            config.response_timeout,
            auth.location.clone(),
        );
        let query_client = QueryClient::new(
            router,
            query_addr,
            config.weather_cache_ttl,
            config.response_timeout,
            auth.query.clone(),
        );

        Ok(Self {
            version: config.protocol_version,
            location_addr,
            query_addr,
            report_addr,
            location_client,
            query_client,
            auth,
        })
    }

    pub fn location_client(&self) -> &LocationClient {
        &self.location_client
    }

    pub fn query_client(&self) -> &QueryClient {
        &self.query_client
    }

    /// Sign a frame for its next hop when that hop wants authentication.
    fn inject_hop_auth(&self, frame: &mut Frame, hop: &AuthConfig) -> Result<(), HandlerError> {
        if !hop.is_required_for(frame.header.packet_type as u8) {
            return Ok(());
        }
        let digest = hop
            .calculate(frame.header.packet_id, frame.header.timestamp)
            .map_err(|e| HandlerError::new(codes::AUTH, e.to_string()))?;
        frame
            .ext
            .set_auth_hash(digest)
            .map_err(|e| HandlerError::new(codes::AUTH, e.to_string()))?;
        frame.header.request_auth = true;
        Ok(())
    }

    async fn forward(
        &self,
        ctx: &RequestContext,
        frame: &Frame,
        target: SocketAddr,
        fail_code: u16,
    ) -> Result<(), HandlerError> {
        let wire = frame
            .encode()
            .map_err(|e| HandlerError::new(fail_code, e.to_string()))?;
        ctx.send_to(&wire, target)
            .await
            .map_err(|e| HandlerError::new(fail_code, e.message))
    }

    /// Type 0: answer from the coordinate cache when possible, otherwise
    /// hand the request to the Location Server.
    async fn handle_location_request(
        &self,
        ctx: &RequestContext,
        mut frame: Frame,
    ) -> Result<(), HandlerError> {
        let origin = frame.ext.source().unwrap_or(ctx.peer);

        if let Some((latitude, longitude)) = frame.ext.coordinates() {
            if let Some(area_code) = self.location_client.cache_lookup(latitude, longitude) {
                debug!("coordinate cache hit ({latitude}, {longitude}) -> {area_code:06}");
                let mut query = QueryRequest::new(
                    frame.header.packet_id,
                    area_code,
                    frame.header.flags,
                    frame.header.day,
                );
                query.frame_mut().header.version = frame.header.version;
                let err = |e: crate::packet::PacketError| HandlerError::internal(e.to_string());
                query
                    .frame_mut()
                    .ext
                    .set_coordinates(latitude, longitude)
                    .map_err(err)?;
                query.frame_mut().ext.set_source(origin).map_err(err)?;
                return self.dispatch_query(ctx, query.into_frame(), origin).await;
            }
        }

        frame
            .ext
            .set_source(origin)
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        self.inject_hop_auth(&mut frame, &self.auth.location)?;
        self.forward(ctx, &frame, self.location_addr, codes::LOCATION_FORWARD)
            .await
    }

    /// Type 2 entry point (and the tail of a cache-hit Type 0): answer from
    /// the weather cache or forward to the Query Server. `frame` already
    /// carries its source record.
    async fn dispatch_query(
        &self,
        ctx: &RequestContext,
        mut frame: Frame,
        origin: SocketAddr,
    ) -> Result<(), HandlerError> {
        let header = frame.header;
        if let Some(cached) =
            self.query_client
                .cache_lookup(header.area_code, header.flags, header.day)
        {
            debug!(
                "weather cache hit for {:06}, answering {origin} directly",
                header.area_code
            );
            return self.synthesize_response(ctx, &frame, &cached.answer, origin).await;
        }

        self.inject_hop_auth(&mut frame, &self.auth.query)?;
        self.forward(ctx, &frame, self.query_addr, codes::QUERY_FORWARD)
            .await
    }

    /// Build a Type 3 out of cached data and send it straight to `origin`.
    async fn synthesize_response(
        &self,
        ctx: &RequestContext,
        request: &Frame,
        answer: &WeatherAnswer,
        origin: SocketAddr,
    ) -> Result<(), HandlerError> {
        let response = QueryResponse::for_request(request, answer)
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        let wire = response
            .encode()
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        ctx.send_to(&wire, origin).await
    }

    /// Type 1: remember the resolution, then either answer from the
    /// weather cache or turn the response into a Type 2 for the Query
    /// Server.
    async fn handle_location_response(
        &self,
        ctx: &RequestContext,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let area_code = frame.header.area_code;
        if area_code != 0 {
            if let Some((latitude, longitude)) = frame.ext.coordinates() {
                self.location_client
                    .cache_store(latitude, longitude, area_code);
            }
        }

        if let Some(origin) = frame.ext.source() {
            if let Some(cached) =
                self.query_client
                    .cache_lookup(area_code, frame.header.flags, frame.header.day)
            {
                debug!("weather cache hit after resolution, answering {origin} directly");
                return self
                    .synthesize_response(ctx, &frame, &cached.answer, origin)
                    .await;
            }
        }

        let mut query = QueryRequest::from_location_response(&frame)
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        self.inject_hop_auth(query.frame_mut(), &self.auth.query)?;
        self.forward(ctx, query.frame(), self.query_addr, codes::QUERY_FORWARD)
            .await
    }

    /// Type 3: cache the authoritative answer, strip the routing record,
    /// normalize the version and deliver to the origin.
    async fn handle_query_response(
        &self,
        ctx: &RequestContext,
        mut frame: Frame,
    ) -> Result<(), HandlerError> {
        let Some(origin) = frame.ext.source() else {
            warn!(
                "query response {} carries no source record; dropping",
                frame.header.packet_id
            );
            return Ok(());
        };

        if let Ok(response) = QueryResponse::from_frame(frame.clone()) {
            let answer = WeatherAnswer {
                weather_code: response.weather_code(),
                temperature_c: response.temperature_c(),
                pop: response.pop(),
                alerts: response.alerts(),
                disasters: response.disasters(),
            };
            self.query_client.cache_store(
                frame.header.area_code,
                frame.header.flags,
                frame.header.day,
                answer,
            );
        }

        frame.ext.remove(ExtKey::Source);
        frame.header.version = self.version;
        let wire = frame
            .encode()
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        ctx.send_to(&wire, origin).await
    }

    /// Type 4: stamp the origin into the report (preserving every other
    /// extended record), sign for the report hop, forward.
    async fn handle_report_request(
        &self,
        ctx: &RequestContext,
        mut frame: Frame,
    ) -> Result<(), HandlerError> {
        let origin = frame.ext.source().unwrap_or(ctx.peer);
        frame
            .ext
            .set_source(origin)
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        self.inject_hop_auth(&mut frame, &self.auth.report)?;
        self.forward(ctx, &frame, self.report_addr, codes::QUERY_FORWARD)
            .await
    }

    /// Type 5: strip the routing record and deliver the ACK to the origin.
    async fn handle_report_ack(
        &self,
        ctx: &RequestContext,
        mut frame: Frame,
    ) -> Result<(), HandlerError> {
        let Some(origin) = frame.ext.source() else {
            warn!(
                "report ack {} carries no source record; dropping",
                frame.header.packet_id
            );
            return Ok(());
        };
        frame.ext.remove(ExtKey::Source);
        frame.header.version = self.version;
        let wire = frame
            .encode()
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        ctx.send_to(&wire, origin).await
    }

    /// Type 7: deliver the error packet to its source verbatim.
    async fn handle_error_packet(
        &self,
        ctx: &RequestContext,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let Some(origin) = frame.ext.source() else {
            warn!(
                "error packet {} carries no source record; dropping",
                frame.header.packet_id
            );
            return Ok(());
        };
        let wire = frame
            .encode()
            .map_err(|e| HandlerError::internal(e.to_string()))?;
        ctx.send_to(&wire, origin).await
    }
}

#[async_trait]
impl PacketHandler for WeatherProxy {
    fn name(&self) -> &'static str {
        "weather_server"
    }

    fn accepts(&self, _packet_type: PacketType) -> bool {
        true
    }

    async fn handle(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError> {
        match frame.header.packet_type {
            PacketType::LocationRequest => self.handle_location_request(ctx, frame).await,
            PacketType::LocationResponse => self.handle_location_response(ctx, frame).await,
            PacketType::QueryRequest => {
                let origin = frame.ext.source().unwrap_or(ctx.peer);
                let mut frame = frame;
                frame
                    .ext
                    .set_source(origin)
                    .map_err(|e| HandlerError::internal(e.to_string()))?;
                self.dispatch_query(ctx, frame, origin).await
            }
            PacketType::QueryResponse => self.handle_query_response(ctx, frame).await,
            PacketType::ReportRequest => self.handle_report_request(ctx, frame).await,
            PacketType::ReportAck => self.handle_report_ack(ctx, frame).await,
            PacketType::Error => self.handle_error_packet(ctx, frame).await,
        }
    }
}
