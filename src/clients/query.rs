//! Client stub for the Query Server, with the weather cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::auth::AuthConfig;
use crate::cache::TtlCache;
use crate::net::{PacketIdGenerator, ReplyRouter};
use crate::packet::types::query::{QueryRequest, QueryResponse, WeatherAnswer};
use crate::packet::{DataFlags, PacketType};

use super::{expect_reply, ClientResult};

/// The weather cache key: area, flag bitmap, day.
pub fn fingerprint(area_code: u32, flags: DataFlags, day: u8) -> String {
    let mut letters = String::new();
    for (set, letter) in [
        (flags.weather, 'w'),
        (flags.temperature, 't'),
        (flags.pop, 'p'),
        (flags.alert, 'a'),
        (flags.disaster, 'd'),
    ] {
        if set {
            letters.push(letter);
        }
    }
    if letters.is_empty() {
        letters.push_str("none");
    }
    format!("{area_code:06}:{letters}:d{day}")
}

/// A cache entry remembers which flags it covers so a hit can be checked
/// against the request's bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedWeather {
    pub flags: DataFlags,
    pub answer: WeatherAnswer,
}

pub struct QueryClient {
    router: Arc<ReplyRouter>,
    target: SocketAddr,
    pidg: PacketIdGenerator,
    cache: TtlCache<String, CachedWeather>,
    timeout: Duration,
    auth: AuthConfig,
}

impl QueryClient {
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

    /// Unexpired entry covering at least the requested flags, or None.
    pub fn cache_lookup(&self, area_code: u32, flags: DataFlags, day: u8) -> Option<CachedWeather> {
        let entry = self.cache.get(&fingerprint(area_code, flags, day))?;
        entry.flags.covers(&flags).then_some(entry)
    }

    pub fn cache_store(&self, area_code: u32, flags: DataFlags, day: u8, answer: WeatherAnswer) {
        self.cache.insert(
            fingerprint(area_code, flags, day),
            CachedWeather { flags, answer },
        );
    }

    /// Fetch the flag-selected weather for an area.
    pub async fn get_weather(
        &self,
        area_code: u32,
        flags: DataFlags,
        day: u8,
        use_cache: bool,
    ) -> ClientResult<WeatherAnswer> {
        if use_cache {
            if let Some(cached) = self.cache_lookup(area_code, flags, day) {
                debug!("weather cache hit: {}", fingerprint(area_code, flags, day));
                return Ok(cached.answer);
            }
        }

        let packet_id = self.pidg.next_id();
        let mut request = QueryRequest::new(packet_id, area_code, flags, day);
        if self.auth.is_required_for(PacketType::QueryRequest as u8) {
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
        let frame = expect_reply(&reply, PacketType::QueryResponse)?;
        let response = QueryResponse::from_frame(frame)?;

        let answer = WeatherAnswer {
            weather_code: response.weather_code(),
            temperature_c: response.temperature_c(),
            pop: response.pop(),
            alerts: response.alerts(),
            disasters: response.disasters(),
        };
        self.cache_store(area_code, flags, day, answer.clone());
        Ok(answer)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_mirrors_flag_letters() {
        let wtp = DataFlags::new(true, true, true, false, false);
        assert_eq!(fingerprint(130_000, wtp, 0), "130000:wtp:d0");
        let ad = DataFlags::new(false, false, false, true, true);
        assert_eq!(fingerprint(11_000, ad, 3), "011000:ad:d3");
        assert_eq!(
            fingerprint(11_000, DataFlags::default(), 0),
            "011000:none:d0"
        );
    }

    #[tokio::test]
    async fn cache_never_serves_a_superset_request() {
        let router = Arc::new(ReplyRouter::bind(2048).await.unwrap());
        let client = QueryClient::new(
            router,
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_secs(60),
            Duration::from_millis(50),
            AuthConfig::disabled(),
        );
        let w = DataFlags::new(true, false, false, false, false);
        let wt = DataFlags::new(true, true, false, false, false);
        client.cache_store(
            130_000,
            w,
            0,
            WeatherAnswer {
                weather_code: Some(100),
                ..Default::default()
            },
        );
        assert!(client.cache_lookup(130_000, w, 0).is_some());
        // broader request, distinct fingerprint: miss
        assert!(client.cache_lookup(130_000, wt, 0).is_none());
        // different day: miss
        assert!(client.cache_lookup(130_000, w, 1).is_none());
    }
}
