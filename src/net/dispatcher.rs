//! The per-server request dispatcher.
//!
//! Every server binds one UDP socket, reads datagrams in a single loop, and
//! runs each datagram through the same stages: decode, version check,
//! authentication, server-specific validation, handler. Worker concurrency
//! is bounded by a semaphore sized `max_workers`; when the pool is
//! saturated the receive loop stalls and the OS buffer absorbs or drops
//! the overflow, which is the protocol's intended backpressure.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;

use crate::auth::AuthConfig;
use crate::config::ServerConfig;
use crate::packet::checksum::verify_checksum12;
use crate::packet::types::error_response::{codes, ErrorResponse};
use crate::packet::{ExtendedField, Frame, Header, PacketType};

/// Request / success / error counters, always touched under the one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    requests: u64,
    successes: u64,
    errors: u64,
}

#[derive(Debug)]
pub struct ServerStats {
    counters: Mutex<Counters>,
    started: Instant,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub uptime_secs: f64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_request(&self) {
        self.lock().requests += 1;
    }

    pub fn record_success(&self) {
        self.lock().successes += 1;
    }

    pub fn record_error(&self) {
        self.lock().errors += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = *self.lock();
        StatsSnapshot {
            requests: counters.requests,
            successes: counters.successes,
            errors: counters.errors,
            uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A handler failure the dispatcher turns into a Type 7 on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub code: u16,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Everything a handler needs to answer a datagram: the shared listen
/// socket (for sendto) and the peer it arrived from.
pub struct RequestContext {
    socket: Arc<UdpSocket>,
    pub peer: SocketAddr,
    pub stats: Arc<ServerStats>,
}

impl RequestContext {
    /// Send raw bytes, enforcing the full-datagram-or-error rule.
    pub async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<(), HandlerError> {
        let sent = self
            .socket
            .send_to(payload, target)
            .await
            .map_err(|e| HandlerError::internal(format!("send to {target} failed: {e}")))?;
        if sent != payload.len() {
            return Err(HandlerError::new(
                codes::LENGTH,
                format!("short send to {target}: {sent}/{} bytes", payload.len()),
            ));
        }
        Ok(())
    }

    /// Deliver a Type 7 to `dest`, carrying `dest` as the source record.
    pub async fn send_error(&self, packet_id: u16, code: u16, dest: SocketAddr) {
        let packet = ErrorResponse::new(packet_id, code)
            .with_source(dest)
            .and_then(|e| e.encode());
        match packet {
            Ok(wire) => {
                if let Err(e) = self.socket.send_to(&wire, dest).await {
                    warn!("error packet ({code}) to {dest} failed: {e}");
                }
            }
            Err(e) => warn!("could not build error packet ({code}): {e}"),
        }
    }
}

/// Server-specific behavior plugged into the dispatcher.
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Packet types this server accepts at all; anything else is a 400.
    fn accepts(&self, packet_type: PacketType) -> bool;

    /// Server-specific validation beyond version and type.
    fn validate(&self, frame: &Frame) -> Result<(), HandlerError> {
        let _ = frame;
        Ok(())
    }

    async fn handle(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError>;
}

pub struct UdpServer<H> {
    socket: Arc<UdpSocket>,
    handler: Arc<H>,
    auth: AuthConfig,
    stats: Arc<ServerStats>,
    protocol_version: u8,
    max_workers: usize,
    buffer_size: usize,
    debug: bool,
}

impl<H: PacketHandler> UdpServer<H> {
    pub async fn bind(config: &ServerConfig, handler: H) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr()).await?;
        info!(
            "{} listening on {} ({} workers)",
            handler.name(),
            socket.local_addr()?,
            config.max_workers
        );
        Ok(Self {
            socket: Arc::new(socket),
            handler: Arc::new(handler),
            auth: config.auth_config(),
            stats: Arc::new(ServerStats::new()),
            protocol_version: config.protocol_version,
            max_workers: config.max_workers,
            buffer_size: config.udp_buffer_size,
            debug: config.debug,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Clone of the listen socket handle for components that forward
    /// through it (the proxy's downstream legs).
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Receive loop. Runs until the socket fails.
    pub async fn run(&self) -> io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let data = buf[..len].to_vec();
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            };
            let ctx = RequestContext {
                socket: self.socket.clone(),
                peer,
                stats: self.stats.clone(),
            };
            let handler = self.handler.clone();
            let auth = self.auth.clone();
            let version = self.protocol_version;
            let debug = self.debug;
            tokio::spawn(async move {
                let _permit = permit;
                process_datagram(handler, ctx, auth, version, debug, data).await;
            });
        }
    }
}

async fn process_datagram<H: PacketHandler>(
    handler: Arc<H>,
    ctx: RequestContext,
    auth: AuthConfig,
    protocol_version: u8,
    debug: bool,
    data: Vec<u8>,
) {
    ctx.stats.record_request();
    let started = Instant::now();

    let frame = match Frame::decode(&data) {
        Ok(frame) => frame,
        Err(e) => {
            ctx.stats.record_error();
            // A decode failure usually leaves no trustworthy source; when
            // one is recoverable the origin still deserves a 530.
            match recover_source(&data) {
                Some((packet_id, source)) => {
                    warn!("[{}] undecodable datagram from {}: {e}; erroring to {source}", handler.name(), ctx.peer);
                    ctx.send_error(packet_id, codes::INTERNAL, source).await;
                }
                None => {
                    warn!(
                        "[{}] dropped undecodable {}-byte datagram from {}: {e}",
                        handler.name(),
                        data.len(),
                        ctx.peer
                    );
                }
            }
            return;
        }
    };
    let parse_time = started.elapsed();

    let packet_id = frame.header.packet_id;
    let error_dest = frame.ext.source().unwrap_or(ctx.peer);

    if frame.header.version != protocol_version {
        ctx.stats.record_error();
        debug!(
            "[{}] version {} from {} (expected {protocol_version})",
            handler.name(),
            frame.header.version,
            ctx.peer
        );
        ctx.send_error(packet_id, codes::VERSION, error_dest).await;
        return;
    }

    if !handler.accepts(frame.header.packet_type) {
        ctx.stats.record_error();
        ctx.send_error(packet_id, codes::BAD_PACKET, error_dest).await;
        return;
    }

    // Authentication is terminal: a protected type never reaches the
    // handler without a verified digest.
    if auth.is_required_for(frame.header.packet_type as u8) {
        let verified = frame
            .ext
            .auth_hash()
            .map(|digest| auth.verify(packet_id, frame.header.timestamp, digest))
            .unwrap_or(false);
        if !verified {
            ctx.stats.record_error();
            warn!(
                "[{}] auth failure for type {:?} from {}",
                handler.name(),
                frame.header.packet_type,
                ctx.peer
            );
            if let Some(digest) = frame.ext.auth_hash() {
                debug!("[{}] rejected digest {}", handler.name(), hex::encode(digest));
            }
            ctx.send_error(packet_id, codes::AUTH, error_dest).await;
            return;
        }
    }

    if let Err(e) = handler.validate(&frame) {
        ctx.stats.record_error();
        debug!("[{}] invalid request from {}: {e}", handler.name(), ctx.peer);
        ctx.send_error(packet_id, e.code, error_dest).await;
        return;
    }

    let handle_started = Instant::now();
    match handler.handle(&ctx, frame).await {
        Ok(()) => {
            ctx.stats.record_success();
            if debug {
                debug!(
                    "[{}] {} handled in parse={}us handle={}us",
                    handler.name(),
                    ctx.peer,
                    parse_time.as_micros(),
                    handle_started.elapsed().as_micros()
                );
            }
        }
        Err(e) => {
            ctx.stats.record_error();
            error!("[{}] handler failed for {}: {e}", handler.name(), ctx.peer);
            ctx.send_error(packet_id, e.code, error_dest).await;
        }
    }
}

/// Best-effort source recovery from a datagram the codec rejected: only a
/// buffer whose checksum still verifies is trusted enough to read the
/// extended region out of.
fn recover_source(data: &[u8]) -> Option<(u16, SocketAddr)> {
    if !verify_checksum12(data) {
        return None;
    }
    let header = Header::decode(data).ok()?;
    if !header.ex_flag {
        return None;
    }
    let ext_start = if header.packet_type.carries_payload() { 20 } else { 16 };
    if data.len() <= ext_start {
        return None;
    }
    let ext = ExtendedField::from_wire(&data[ext_start..]).ok()?;
    ext.source().map(|source| (header.packet_id, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::header::DataFlags;
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl PacketHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "echo_server"
        }

        fn accepts(&self, packet_type: PacketType) -> bool {
            packet_type == PacketType::QueryRequest
        }

        async fn handle(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError> {
            let wire = frame
                .encode()
                .map_err(|e| HandlerError::internal(e.to_string()))?;
            ctx.send_to(&wire, ctx.peer).await
        }
    }

    fn request_wire(packet_id: u16, version: u8) -> Vec<u8> {
        let mut header = Header::new(PacketType::QueryRequest, packet_id);
        header.version = version;
        header.flags = DataFlags::new(true, false, false, false, false);
        header.area_code = 11000;
        Frame::new(header).encode().unwrap()
    }

    async fn spawn_echo(auth: Option<AuthConfig>) -> SocketAddr {
        let mut config = ServerConfig::defaults(crate::config::ServerRole::Query);
        config.host = "127.0.0.1".into();
        config.port = 0;
        if let Some(auth) = auth {
            config.auth_enabled = auth.enabled;
            config.passphrase = auth.passphrase.clone();
            config.auth_packet_types = auth.target_packet_types.iter().copied().collect();
        }
        let server = UdpServer::bind(&config, EchoHandler).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn exchange(addr: SocketAddr, wire: &[u8]) -> Vec<u8> {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        socket.send_to(wire, addr).await.unwrap();
        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn valid_request_reaches_the_handler() {
        let addr = spawn_echo(None).await;
        let reply = exchange(addr, &request_wire(11, 1)).await;
        let frame = Frame::decode(&reply).unwrap();
        assert_eq!(frame.header.packet_type, PacketType::QueryRequest);
        assert_eq!(frame.header.packet_id, 11);
    }

    #[tokio::test]
    async fn version_mismatch_yields_403() {
        let addr = spawn_echo(None).await;
        let reply = exchange(addr, &request_wire(12, 2)).await;
        let error = ErrorResponse::decode(&reply).unwrap();
        assert_eq!(error.error_code(), codes::VERSION);
        assert_eq!(error.packet_id(), 12);
    }

    #[tokio::test]
    async fn unaccepted_type_yields_400() {
        let addr = spawn_echo(None).await;
        let mut header = Header::new(PacketType::ReportAck, 13);
        header.area_code = 1;
        let wire = Frame::new(header).encode().unwrap();
        let reply = exchange(addr, &wire).await;
        let error = ErrorResponse::decode(&reply).unwrap();
        assert_eq!(error.error_code(), codes::BAD_PACKET);
    }

    #[tokio::test]
    async fn protected_type_without_digest_yields_401() {
        let auth = AuthConfig::new("k").with_target_types([2u8]);
        let addr = spawn_echo(Some(auth)).await;
        let reply = exchange(addr, &request_wire(14, 1)).await;
        let error = ErrorResponse::decode(&reply).unwrap();
        assert_eq!(error.error_code(), codes::AUTH);
    }

    #[tokio::test]
    async fn protected_type_with_good_digest_passes() {
        let auth = AuthConfig::new("k").with_target_types([2u8]);
        let addr = spawn_echo(Some(auth.clone())).await;

        let mut header = Header::new(PacketType::QueryRequest, 15);
        header.flags = DataFlags::new(true, false, false, false, false);
        header.area_code = 11000;
        header.timestamp = 1_700_000_000;
        let mut frame = Frame::new(header);
        let digest = auth.calculate(15, 1_700_000_000).unwrap();
        frame.ext.set_auth_hash(digest).unwrap();

        let reply = exchange(addr, &frame.encode().unwrap()).await;
        let decoded = Frame::decode(&reply).unwrap();
        assert_eq!(decoded.header.packet_type, PacketType::QueryRequest);
    }

    #[tokio::test]
    async fn corrupt_checksum_is_dropped_silently() {
        let addr = spawn_echo(None).await;
        let mut wire = request_wire(16, 1);
        wire[15] ^= 0x01; // flip a checksum bit
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        socket.send_to(&wire, addr).await.unwrap();
        let mut buf = [0u8; 2048];
        let outcome =
            tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
        assert!(outcome.is_err(), "no response expected for corrupt packet");
    }

    #[test]
    fn stats_counters_accumulate() {
        let stats = ServerStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_success();
        stats.record_error();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.errors, 1);
    }
}
