//! The Location Server: Type 0 in, Type 1 out.
//!
//! Resolves a coordinate pair to the administrative district containing it
//! through the pooled geometry backend, with an in-process TTL cache keyed
//! by the exact "lon,lat" string. Error packets that still carry a source
//! record are relayed onward rather than answered.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::cache::TtlCache;
use crate::net::{HandlerError, PacketHandler, RequestContext};
use crate::packet::types::error_response::codes;
use crate::packet::types::location::LocationResponse;
use crate::packet::{Frame, PacketType};
use crate::stores::geometry::{GeometryConnection, GeometryPool};

pub struct LocationServer<C: GeometryConnection> {
    pool: GeometryPool<C>,
    cache: TtlCache<String, Option<u32>>,
}

impl<C: GeometryConnection> LocationServer<C> {
    pub fn new(pool: GeometryPool<C>, cache_ttl: Duration) -> Self {
        Self {
            pool,
            // no capacity bound; callers quantize the coordinate domain
            cache: TtlCache::with_capacity(cache_ttl, 0),
        }
    }

    async fn district_code(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> Result<Option<u32>, HandlerError> {
        let key = format!("{longitude},{latitude}");
        if let Some(cached) = self.cache.get(&key) {
            debug!("area cache hit: {key} -> {cached:?}");
            return Ok(cached);
        }
        let code = self
            .pool
            .district_code(longitude, latitude)
            .await
            .map_err(|e| HandlerError::new(codes::LOCATION_INTERNAL, e.to_string()))?;
        self.cache.insert(key, code);
        Ok(code)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn relay_error(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError> {
        match frame.ext.source() {
            Some(source) => {
                let wire = frame
                    .encode()
                    .map_err(|e| HandlerError::internal(e.to_string()))?;
                info!("relaying error packet {} to {source}", frame.header.packet_id);
                ctx.send_to(&wire, source).await
            }
            None => {
                warn!("error packet without source record; nowhere to relay");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<C: GeometryConnection> PacketHandler for LocationServer<C> {
    fn name(&self) -> &'static str {
        "location_server"
    }

    fn accepts(&self, packet_type: PacketType) -> bool {
        matches!(
            packet_type,
            PacketType::LocationRequest | PacketType::Error
        )
    }

    fn validate(&self, frame: &Frame) -> Result<(), HandlerError> {
        if frame.header.packet_type != PacketType::LocationRequest {
            return Ok(());
        }
        if !frame.header.ex_flag || frame.ext.is_empty() {
            return Err(HandlerError::new(
                codes::BAD_PACKET,
                "location request without extended field",
            ));
        }
        if frame.ext.coordinates().is_none() {
            return Err(HandlerError::new(
                codes::AUTH,
                "latitude/longitude records missing",
            ));
        }
        Ok(())
    }

    async fn handle(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError> {
        if frame.header.packet_type == PacketType::Error {
            return self.relay_error(ctx, frame).await;
        }

        let (latitude, longitude) = frame
            .ext
            .coordinates()
            .ok_or_else(|| HandlerError::new(codes::AUTH, "coordinates missing"))?;

        // None resolves to area 0, which the header encodes as "unset".
        let area_code = self.district_code(longitude, latitude).await?.unwrap_or(0);
        debug!(
            "resolved ({latitude}, {longitude}) -> {:06} for packet {}",
            area_code, frame.header.packet_id
        );

        let response = LocationResponse::for_request(&frame, area_code)
            .map_err(|e| HandlerError::new(codes::LOCATION_INTERNAL, e.to_string()))?;
        let wire = response
            .encode()
            .map_err(|e| HandlerError::new(codes::LOCATION_INTERNAL, e.to_string()))?;
        ctx.send_to(&wire, ctx.peer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::geometry::{demo_geometry, FailingGeometry};

    fn server() -> LocationServer<crate::stores::geometry::MemoryGeometry> {
        LocationServer::new(
            GeometryPool::with_defaults(demo_geometry),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn lookup_populates_the_cache() {
        let server = server();
        assert_eq!(server.district_code(139.6917, 35.6895).await.unwrap(), Some(130_000));
        assert_eq!(server.cache_len(), 1);
        // second hit comes from cache
        assert_eq!(server.district_code(139.6917, 35.6895).await.unwrap(), Some(130_000));
    }

    #[tokio::test]
    async fn unknown_point_caches_the_miss() {
        let server = server();
        assert_eq!(server.district_code(0.0, 0.0).await.unwrap(), None);
        assert_eq!(server.cache_len(), 1);
    }

    #[tokio::test]
    async fn backend_failure_maps_to_510() {
        let server = LocationServer::new(
            GeometryPool::with_defaults(|| FailingGeometry),
            Duration::from_secs(60),
        );
        let err = server.district_code(139.7, 35.7).await.unwrap_err();
        assert_eq!(err.code, codes::LOCATION_INTERNAL);
    }

    #[test]
    fn validation_requires_coordinates() {
        use crate::packet::{DataFlags, Header};

        let server = server();
        let mut header = Header::new(PacketType::LocationRequest, 1);
        header.flags = DataFlags::new(true, false, false, false, false);
        let mut frame = Frame::new(header);
        // no extended field at all
        let err = server.validate(&frame).unwrap_err();
        assert_eq!(err.code, codes::BAD_PACKET);

        // extended field present but no coordinates
        frame.header.ex_flag = true;
        frame.ext.add_alert("x").unwrap();
        let err = server.validate(&frame).unwrap_err();
        assert_eq!(err.code, codes::AUTH);

        frame.ext.set_coordinates(35.0, 139.0).unwrap();
        assert!(server.validate(&frame).is_ok());
    }
}
