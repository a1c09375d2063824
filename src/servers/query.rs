//! The Query Server: Type 2 in, Type 3 out.
//!
//! Serves flag-selected weather for an area code out of the document store,
//! checking the alert/disaster pull markers first and triggering the
//! ingestion hooks when they have gone stale. Two background jobs keep the
//! store warm: a daily refresh at the configured times and a periodic retry
//! over the skip list of areas whose last refresh was a no-op.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime};
use log::{debug, info, warn};

use crate::config::ServerConfig;
use crate::net::{HandlerError, PacketHandler, RequestContext};
use crate::packet::types::error_response::codes;
use crate::packet::types::query::{QueryResponse, WeatherAnswer};
use crate::packet::{Frame, PacketType};
use crate::stores::weather_doc::{WeatherDocument, WeatherStore, KEY_ALERT_PULL, KEY_DISASTER_PULL};

/// Opaque ingestion collaborators. The real implementations talk to the
/// JMA feeds; tests plug in recorders.
#[async_trait]
pub trait RefreshHooks: Send + Sync + 'static {
    async fn refresh_alerts(&self);

    async fn refresh_disasters(&self);

    /// Re-ingest weather documents for `areas` (all areas when None).
    /// Returns the areas whose refresh was a no-op: the skip list.
    async fn refresh_weather(&self, areas: Option<Vec<u32>>) -> Vec<u32>;
}

/// Hooks that do nothing, for deployments where ingestion runs elsewhere.
pub struct NoopRefresh;

#[async_trait]
impl RefreshHooks for NoopRefresh {
    async fn refresh_alerts(&self) {}

    async fn refresh_disasters(&self) {}

    async fn refresh_weather(&self, _areas: Option<Vec<u32>>) -> Vec<u32> {
        Vec::new()
    }
}

pub struct QueryServer<S: WeatherStore, R: RefreshHooks> {
    store: Arc<S>,
    refresh: Arc<R>,
    staleness_minutes: i64,
    skip_areas: Arc<Mutex<Vec<u32>>>,
}

impl<S: WeatherStore, R: RefreshHooks> QueryServer<S, R> {
    pub fn new(store: Arc<S>, refresh: Arc<R>, staleness_minutes: u64) -> Self {
        Self {
            store,
            refresh,
            staleness_minutes: staleness_minutes as i64,
            skip_areas: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn skip_areas(&self) -> Vec<u32> {
        self.skip_areas.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn marker_is_stale(&self, marker: Option<String>) -> bool {
        let Some(raw) = marker else {
            return true;
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(pulled) => {
                let age = Local::now().signed_duration_since(pulled);
                age >= ChronoDuration::minutes(self.staleness_minutes)
            }
            Err(e) => {
                warn!("unparseable pull marker '{raw}': {e}");
                true
            }
        }
    }

    /// Trigger the alert / disaster pulls when their markers are stale.
    async fn ensure_freshness(&self) {
        let (disaster, alert) = futures::join!(
            self.store.get_marker(KEY_DISASTER_PULL),
            self.store.get_marker(KEY_ALERT_PULL)
        );
        match disaster {
            Ok(marker) => {
                if self.marker_is_stale(marker) {
                    debug!("disaster pull marker stale; refreshing");
                    self.refresh.refresh_disasters().await;
                }
            }
            Err(e) => warn!("disaster pull marker unreadable: {e}"),
        }
        match alert {
            Ok(marker) => {
                if self.marker_is_stale(marker) {
                    debug!("alert pull marker stale; refreshing");
                    self.refresh.refresh_alerts().await;
                }
            }
            Err(e) => warn!("alert pull marker unreadable: {e}"),
        }
    }

    fn extract(document: &WeatherDocument, frame: &Frame) -> WeatherAnswer {
        let flags = frame.header.flags;
        let day = frame.header.day;
        WeatherAnswer {
            weather_code: flags.weather.then(|| document.weather_on(day)).flatten(),
            temperature_c: flags
                .temperature
                .then(|| document.temperature_on(day))
                .flatten(),
            pop: flags.pop.then(|| document.pop_on(day)).flatten(),
            alerts: if flags.alert {
                document.warnings.clone()
            } else {
                Vec::new()
            },
            disasters: if flags.disaster {
                document.disaster_info.clone()
            } else {
                Vec::new()
            },
        }
    }

    /// Spawn the daily-refresh and skip-list-retry jobs for this server.
    pub fn start_scheduler(&self, config: &ServerConfig) -> QueryScheduler {
        QueryScheduler::spawn(
            self.refresh.clone(),
            self.skip_areas.clone(),
            config.update_times(),
            config.skip_area_check_interval_minutes,
        )
    }
}

#[async_trait]
impl<S: WeatherStore, R: RefreshHooks> PacketHandler for QueryServer<S, R> {
    fn name(&self) -> &'static str {
        "query_server"
    }

    fn accepts(&self, packet_type: PacketType) -> bool {
        packet_type == PacketType::QueryRequest
    }

    fn validate(&self, frame: &Frame) -> Result<(), HandlerError> {
        if !frame.header.has_area_code() {
            return Err(HandlerError::new(codes::MISSING_AREA, "area code unset"));
        }
        if !frame.header.flags.any() {
            return Err(HandlerError::new(codes::BAD_PACKET, "no data flags set"));
        }
        Ok(())
    }

    async fn handle(&self, ctx: &RequestContext, frame: Frame) -> Result<(), HandlerError> {
        self.ensure_freshness().await;

        let area_code = frame.header.area_code;
        let document = self
            .store
            .get_document(area_code)
            .await
            .map_err(|e| HandlerError::new(codes::QUERY_INTERNAL, e.to_string()))?
            .ok_or_else(|| {
                HandlerError::new(
                    codes::QUERY_INTERNAL,
                    format!("no document for area {area_code:06}"),
                )
            })?;

        let answer = Self::extract(&document, &frame);
        debug!(
            "serving {:06} day {}: {answer:?}",
            area_code, frame.header.day
        );

        let mut response = QueryResponse::for_request(&frame, &answer)
            .map_err(|e| HandlerError::new(codes::QUERY_INTERNAL, e.to_string()))?;
        // the proxy routes the answer home by this record
        if let Some(source) = frame.ext.source() {
            response
                .frame_mut()
                .ext
                .set_source(source)
                .map_err(|e| HandlerError::new(codes::QUERY_INTERNAL, e.to_string()))?;
        }

        let wire = response
            .encode()
            .map_err(|e| HandlerError::new(codes::QUERY_INTERNAL, e.to_string()))?;
        ctx.send_to(&wire, ctx.peer).await
    }
}

/// Handles for the two background jobs; aborted on drop.
pub struct QueryScheduler {
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl QueryScheduler {
    fn spawn<R: RefreshHooks>(
        refresh: Arc<R>,
        skip_areas: Arc<Mutex<Vec<u32>>>,
        update_times: Vec<(u32, u32)>,
        skip_interval_minutes: u64,
    ) -> Self {
        let mut tasks = Vec::new();

        for (hour, minute) in update_times {
            let refresh = refresh.clone();
            let skip_areas = skip_areas.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(until_next(hour, minute)).await;
                    info!("scheduled weather refresh ({hour:02}:{minute:02})");
                    let skipped = refresh.refresh_weather(None).await;
                    if !skipped.is_empty() {
                        info!("{} areas skipped by the refresh", skipped.len());
                    }
                    *skip_areas.lock().unwrap_or_else(|e| e.into_inner()) = skipped;
                }
            }));
        }

        let interval = std::time::Duration::from_secs(skip_interval_minutes.max(1) * 60);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick
            loop {
                ticker.tick().await;
                let pending = skip_areas
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if pending.is_empty() {
                    continue;
                }
                info!("retrying {} skipped areas", pending.len());
                let still_skipped = refresh.refresh_weather(Some(pending)).await;
                *skip_areas.lock().unwrap_or_else(|e| e.into_inner()) = still_skipped;
            }
        }));

        Self { tasks }
    }
}

impl Drop for QueryScheduler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Wall-clock delay until the next local occurrence of HH:MM.
fn until_next(hour: u32, minute: u32) -> std::time::Duration {
    let now = Local::now();
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
    let mut target = now.date_naive().and_time(target_time);
    if target <= now.naive_local() {
        target += ChronoDuration::days(1);
    }
    (target - now.naive_local())
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DataFlags, Header};
    use crate::stores::weather_doc::MemoryWeatherStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresh {
        alerts: AtomicUsize,
        disasters: AtomicUsize,
    }

    impl CountingRefresh {
        fn new() -> Self {
            Self {
                alerts: AtomicUsize::new(0),
                disasters: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RefreshHooks for CountingRefresh {
        async fn refresh_alerts(&self) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }

        async fn refresh_disasters(&self) {
            self.disasters.fetch_add(1, Ordering::SeqCst);
        }

        async fn refresh_weather(&self, _areas: Option<Vec<u32>>) -> Vec<u32> {
            Vec::new()
        }
    }

    fn request_frame(area_code: u32, flags: DataFlags, day: u8) -> Frame {
        let mut header = Header::new(PacketType::QueryRequest, 5);
        header.flags = flags;
        header.day = day;
        header.area_code = area_code;
        Frame::new(header)
    }

    fn sample_document() -> WeatherDocument {
        WeatherDocument {
            area_name: "東京都".into(),
            weather: vec![100, 201],
            temperature: vec![25, 22],
            precipitation_prob: vec![30, 50],
            warnings: vec!["大雨警報".into()],
            disaster_info: vec!["土砂災害警戒".into()],
            ..Default::default()
        }
    }

    fn server() -> QueryServer<MemoryWeatherStore, CountingRefresh> {
        QueryServer::new(
            Arc::new(MemoryWeatherStore::new()),
            Arc::new(CountingRefresh::new()),
            1440,
        )
    }

    #[test]
    fn validation_codes() {
        let server = server();
        let frame = request_frame(0, DataFlags::new(true, false, false, false, false), 0);
        assert_eq!(server.validate(&frame).unwrap_err().code, codes::MISSING_AREA);
        let frame = request_frame(130_000, DataFlags::default(), 0);
        assert_eq!(server.validate(&frame).unwrap_err().code, codes::BAD_PACKET);
        let frame = request_frame(130_000, DataFlags::new(true, false, false, false, false), 0);
        assert!(server.validate(&frame).is_ok());
    }

    #[test]
    fn extraction_respects_flags_and_day() {
        let document = sample_document();
        let frame = request_frame(130_000, DataFlags::new(true, true, true, false, false), 1);
        let answer =
            QueryServer::<MemoryWeatherStore, CountingRefresh>::extract(&document, &frame);
        assert_eq!(answer.weather_code, Some(201));
        assert_eq!(answer.temperature_c, Some(22));
        assert_eq!(answer.pop, Some(50));
        assert!(answer.alerts.is_empty());
        assert!(answer.disasters.is_empty());

        let frame = request_frame(130_000, DataFlags::new(false, false, false, true, true), 0);
        let answer =
            QueryServer::<MemoryWeatherStore, CountingRefresh>::extract(&document, &frame);
        assert_eq!(answer.weather_code, None);
        assert_eq!(answer.alerts, vec!["大雨警報"]);
        assert_eq!(answer.disasters, vec!["土砂災害警戒"]);

        // day beyond the stored arrays reads as absent
        let frame = request_frame(130_000, DataFlags::new(true, true, true, false, false), 7);
        let answer =
            QueryServer::<MemoryWeatherStore, CountingRefresh>::extract(&document, &frame);
        assert_eq!(answer.weather_code, None);
        assert_eq!(answer.temperature_c, None);
    }

    #[tokio::test]
    async fn stale_markers_trigger_refresh() {
        let store = Arc::new(MemoryWeatherStore::new());
        let refresh = Arc::new(CountingRefresh::new());
        let server = QueryServer::new(store.clone(), refresh.clone(), 30);

        // missing markers count as stale
        server.ensure_freshness().await;
        assert_eq!(refresh.alerts.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.disasters.load(Ordering::SeqCst), 1);

        // fresh markers suppress the pull
        let now = Local::now().to_rfc3339();
        store.set_marker(KEY_ALERT_PULL, &now).await.unwrap();
        store.set_marker(KEY_DISASTER_PULL, &now).await.unwrap();
        server.ensure_freshness().await;
        assert_eq!(refresh.alerts.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.disasters.load(Ordering::SeqCst), 1);

        // an old marker goes stale again
        let old = (Local::now() - ChronoDuration::minutes(31)).to_rfc3339();
        store.set_marker(KEY_ALERT_PULL, &old).await.unwrap();
        server.ensure_freshness().await;
        assert_eq!(refresh.alerts.load(Ordering::SeqCst), 2);
        assert_eq!(refresh.disasters.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn until_next_is_under_a_day() {
        let delay = until_next(3, 0);
        assert!(delay <= std::time::Duration::from_secs(24 * 3600));
        assert!(delay > std::time::Duration::ZERO);
    }
}
