//! External collaborator seams.
//!
//! The real document store, the PostGIS geometry lookup and the report log
//! directory live outside this system; the servers talk to them through the
//! traits here. In-memory implementations serve tests and single-process
//! demo deployments.

pub mod geometry;
pub mod reports;
pub mod weather_doc;

use std::error::Error;
use std::fmt;

/// Failure talking to a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "store data corrupt: {msg}"),
        }
    }
}

impl Error for StoreError {}

pub use geometry::{GeometryConnection, GeometryPool, MemoryGeometry};
pub use reports::{AppendOutcome, ReportLog, SensorReport};
pub use weather_doc::{MemoryWeatherStore, StoreOp, WeatherDocument, WeatherStore};
