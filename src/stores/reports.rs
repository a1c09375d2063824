//! Per-area append-only sensor report logs.
//!
//! One JSON file per area, `sensor_data_<area>.json`, guarded by a
//! per-area lock so distinct areas write concurrently while writes to one
//! area serialize. Retention optionally trims to the newest N reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::StoreError;

/// One decoded sensor submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub packet_id: u16,
    pub area_code: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub weather_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub precipitation_prob: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alerts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub disasters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AreaLogFile {
    area_code: String,
    created_at: String,
    last_updated: String,
    total_reports: usize,
    reports: Vec<SensorReport>,
}

impl AreaLogFile {
    fn new(area_code: &str) -> Self {
        let now = Local::now().to_rfc3339();
        Self {
            area_code: area_code.to_string(),
            created_at: now.clone(),
            last_updated: now,
            total_reports: 0,
            reports: Vec::new(),
        }
    }
}

/// Whether an append created the area's file or extended an existing one.
/// Exactly one of the two applies per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Created,
    Updated,
}

pub struct ReportLog {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_reports: Option<usize>,
}

impl ReportLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
            max_reports: None,
        }
    }

    /// Keep at most `max` newest reports per area after every append.
    pub fn with_retention(mut self, max: usize) -> Self {
        self.max_reports = Some(max);
        self
    }

    fn file_path(&self, area_code: &str) -> PathBuf {
        self.dir.join(format!("sensor_data_{area_code}.json"))
    }

    fn area_lock(&self, area_code: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(area_code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn read_log(path: &Path) -> Result<Option<AreaLogFile>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        }
    }

    async fn write_log(path: &Path, log: &AreaLogFile) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(log)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))
    }

    /// Append one report to its area file, creating the file on first use.
    pub async fn append(&self, report: SensorReport) -> Result<AppendOutcome, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.dir.display())))?;

        let area_code = report.area_code.clone();
        let lock = self.area_lock(&area_code);
        let _guard = lock.lock().await;

        let path = self.file_path(&area_code);
        let (mut log, outcome) = match Self::read_log(&path).await? {
            Some(log) => (log, AppendOutcome::Updated),
            None => (AreaLogFile::new(&area_code), AppendOutcome::Created),
        };

        log.reports.push(report);
        if let Some(max) = self.max_reports {
            Self::trim(&mut log, max);
        }
        log.total_reports = log.reports.len();
        log.last_updated = Local::now().to_rfc3339();

        Self::write_log(&path, &log).await?;
        Ok(outcome)
    }

    fn trim(log: &mut AreaLogFile, max: usize) {
        if log.reports.len() > max {
            log.reports
                .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            log.reports.truncate(max);
            // keep chronological order on disk, newest last
            log.reports.reverse();
        }
    }

    /// The newest `count` reports for an area, newest first.
    pub async fn latest(&self, area_code: &str, count: usize) -> Result<Vec<SensorReport>, StoreError> {
        let lock = self.area_lock(area_code);
        let _guard = lock.lock().await;
        match Self::read_log(&self.file_path(area_code)).await? {
            Some(log) => {
                let mut reports = log.reports;
                reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                reports.truncate(count);
                Ok(reports)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Explicit retention pass; returns how many reports were dropped.
    pub async fn cleanup(&self, area_code: &str, max_reports: usize) -> Result<usize, StoreError> {
        let lock = self.area_lock(area_code);
        let _guard = lock.lock().await;
        let path = self.file_path(area_code);
        let Some(mut log) = Self::read_log(&path).await? else {
            return Ok(0);
        };
        let before = log.reports.len();
        if before <= max_reports {
            return Ok(0);
        }
        Self::trim(&mut log, max_reports);
        log.total_reports = log.reports.len();
        log.last_updated = Local::now().to_rfc3339();
        Self::write_log(&path, &log).await?;
        Ok(before - log.reports.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(area: &str, timestamp: u64, temperature: Option<i16>) -> SensorReport {
        SensorReport {
            packet_id: 1,
            area_code: area.to_string(),
            timestamp,
            weather_code: None,
            temperature,
            precipitation_prob: None,
            alerts: Vec::new(),
            disasters: Vec::new(),
            source: None,
        }
    }

    #[tokio::test]
    async fn append_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReportLog::new(dir.path());
        assert_eq!(
            log.append(report("130000", 10, Some(25))).await.unwrap(),
            AppendOutcome::Created
        );
        assert_eq!(
            log.append(report("130000", 20, Some(26))).await.unwrap(),
            AppendOutcome::Updated
        );

        let raw = tokio::fs::read(dir.path().join("sensor_data_130000.json"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed["area_code"], "130000");
        assert_eq!(parsed["total_reports"], 2);
        assert_eq!(parsed["reports"][0]["temperature"], 25);
    }

    #[tokio::test]
    async fn latest_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReportLog::new(dir.path());
        for ts in [5u64, 30, 10] {
            log.append(report("011000", ts, None)).await.unwrap();
        }
        let latest = log.latest("011000", 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].timestamp, 30);
        assert_eq!(latest[1].timestamp, 10);
        assert!(log.latest("999999", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retention_trims_to_newest() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReportLog::new(dir.path()).with_retention(3);
        for ts in 0..10u64 {
            log.append(report("130000", ts, None)).await.unwrap();
        }
        let latest = log.latest("130000", 10).await.unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].timestamp, 9);
        assert_eq!(latest[2].timestamp, 7);
    }

    #[tokio::test]
    async fn cleanup_reports_dropped_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReportLog::new(dir.path());
        for ts in 0..5u64 {
            log.append(report("270000", ts, None)).await.unwrap();
        }
        assert_eq!(log.cleanup("270000", 2).await.unwrap(), 3);
        assert_eq!(log.cleanup("270000", 2).await.unwrap(), 0);
        assert_eq!(log.latest("270000", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn distinct_areas_write_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ReportLog::new(dir.path()));
        let mut tasks = Vec::new();
        for area in ["011000", "130000", "270000"] {
            for ts in 0..20u64 {
                let log = log.clone();
                tasks.push(tokio::spawn(async move {
                    log.append(report(area, ts, None)).await
                }));
            }
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        for area in ["011000", "130000", "270000"] {
            assert_eq!(log.latest(area, 100).await.unwrap().len(), 20);
        }
    }
}
