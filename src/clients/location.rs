//! Client stub for the Location Server, with the coordinate cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::auth::AuthConfig;
use crate::cache::TtlCache;
use crate::net::{PacketIdGenerator, ReplyRouter};
use crate::packet::types::location::LocationRequest;
use crate::packet::{DataFlags, PacketType};

use super::{expect_reply, ClientResult};

/// Coordinates quantized to the protocol's 1e-6 precision form the key.
pub fn coordinate_key(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.6},{longitude:.6}")
}

pub struct LocationClient {
    router: Arc<ReplyRouter>,
    target: SocketAddr,
    pidg: PacketIdGenerator,
    cache: TtlCache<String, u32>,
    timeout: Duration,
    auth: AuthConfig,
}

impl LocationClient {
    pub fn new(
        router: Arc<ReplyRouter>,
        target: SocketAddr,
        cache_ttl: Duration,
        timeout: Duration,
        auth: AuthConfig,
    ) -> Self {
        Self {
            router,
            target,
            pidg: PacketIdGenerator::new(),
            cache: TtlCache::new(cache_ttl),
            timeout,
            auth,
        }
    }

    pub fn cache_lookup(&self, latitude: f64, longitude: f64) -> Option<u32> {
        self.cache.get(&coordinate_key(latitude, longitude))
    }

    pub fn cache_store(&self, latitude: f64, longitude: f64, area_code: u32) {
        self.cache
            .insert(coordinate_key(latitude, longitude), area_code);
    }

    /// Resolve (lat, lon) to an area code, consulting the cache first.
    /// Returns 0 when no district contains the point.
    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        flags: DataFlags,
        day: u8,
    ) -> ClientResult<u32> {
        if let Some(area_code) = self.cache_lookup(latitude, longitude) {
            debug!("coordinate cache hit: ({latitude}, {longitude}) -> {area_code:06}");
            return Ok(area_code);
        }

        let packet_id = self.pidg.next_id();
        let mut request = LocationRequest::new(packet_id, latitude, longitude, flags, day)?;
        if self.auth.is_required_for(PacketType::LocationRequest as u8) {
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
        let frame = expect_reply(&reply, PacketType::LocationResponse)?;

        let area_code = frame.header.area_code;
        if area_code != 0 {
            self.cache_store(latitude, longitude, area_code);
        }
        Ok(area_code)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_quantizes_to_micro_degrees() {
        assert_eq!(coordinate_key(35.6895, 139.6917), "35.689500,139.691700");
        // values closer than 1e-6 collapse onto the same entry
        assert_eq!(
            coordinate_key(35.68950000004, 139.6917),
            coordinate_key(35.6895, 139.6917)
        );
    }
}
