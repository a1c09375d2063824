//! The weather document store.
//!
//! Keyed by `weather:<6-digit area code>` plus three singleton markers for
//! ingestion freshness. Documents hold seven-day parallel arrays for
//! weather code, temperature and precipitation probability, and whole-list
//! warnings / disaster information.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoreError;

/// Marker key: when the daily weather ingestion last wrote.
pub const KEY_REPORT_DATETIME: &str = "weather_reportdatetime";
/// Marker key: when alerts were last pulled.
pub const KEY_ALERT_PULL: &str = "alert_pulldatetime";
/// Marker key: when disaster notices were last pulled.
pub const KEY_DISASTER_PULL: &str = "disaster_pulldatetime";

pub fn document_key(area_code: u32) -> String {
    format!("weather:{area_code:06}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherDocument {
    #[serde(default)]
    pub area_name: String,
    #[serde(default)]
    pub parent_code: String,
    #[serde(default)]
    pub weather: Vec<u16>,
    #[serde(default)]
    pub temperature: Vec<i16>,
    #[serde(default)]
    pub precipitation_prob: Vec<u8>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub disaster_info: Vec<String>,
}

impl WeatherDocument {
    pub fn weather_on(&self, day: u8) -> Option<u16> {
        self.weather.get(day as usize).copied()
    }

    pub fn temperature_on(&self, day: u8) -> Option<i16> {
        self.temperature.get(day as usize).copied()
    }

    pub fn pop_on(&self, day: u8) -> Option<u8> {
        self.precipitation_prob.get(day as usize).copied()
    }
}

/// One batched operation. `Set` paths address a top-level document field;
/// the empty path replaces the whole value.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Get(String),
    Set(String, String, Value),
}

#[async_trait]
pub trait WeatherStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, path: &str, value: Value) -> Result<(), StoreError>;

    /// Run `ops` in order; each Get yields its value slot, each Set yields
    /// `None`.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<Option<Value>>, StoreError> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                StoreOp::Get(key) => results.push(self.get(&key).await?),
                StoreOp::Set(key, path, value) => {
                    self.set(&key, &path, value).await?;
                    results.push(None);
                }
            }
        }
        Ok(results)
    }

    async fn get_document(&self, area_code: u32) -> Result<Option<WeatherDocument>, StoreError> {
        match self.get(&document_key(area_code)).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("document {area_code:06}: {e}"))),
            None => Ok(None),
        }
    }

    async fn set_document(
        &self,
        area_code: u32,
        document: &WeatherDocument,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(document)
            .map_err(|e| StoreError::Corrupt(format!("document {area_code:06}: {e}")))?;
        self.set(&document_key(area_code), "", value).await
    }

    /// Read an ISO-8601 marker such as `alert_pulldatetime`.
    async fn get_marker(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(key).await?.and_then(|v| v.as_str().map(String::from)))
    }

    async fn set_marker(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set(key, "", Value::String(value.to_string())).await
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryWeatherStore {
    entries: DashMap<String, Value>,
}

impl MemoryWeatherStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl WeatherStore for MemoryWeatherStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, path: &str, value: Value) -> Result<(), StoreError> {
        if path.is_empty() {
            self.entries.insert(key.to_string(), value);
            return Ok(());
        }
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        match entry.value_mut() {
            Value::Object(map) => {
                map.insert(path.to_string(), value);
                Ok(())
            }
            _ => Err(StoreError::Corrupt(format!(
                "cannot set path '{path}' on non-object key '{key}'"
            ))),
        }
    }
}
