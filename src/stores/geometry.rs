//! The geometry lookup: which administrative district contains a point.
//!
//! The production backend is a PostGIS `ST_Within` query over EPSG:6668
//! district polygons; here it sits behind [`GeometryConnection`] with a
//! borrow/return pool in front, min 1 / max 10 connections, one exclusive
//! borrow per query.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use super::StoreError;

/// One connection to the geometry backend.
#[async_trait]
pub trait GeometryConnection: Send + Sync + 'static {
    /// Point-in-polygon: the code of the district containing
    /// (longitude, latitude), or None when no polygon matches.
    async fn district_code(&self, longitude: f64, latitude: f64)
        -> Result<Option<u32>, StoreError>;
}

/// Bounded connection pool. Borrows block once `max` connections are out;
/// connections beyond the eager minimum are created on first demand.
pub struct GeometryPool<C: GeometryConnection> {
    idle: Mutex<Vec<C>>,
    permits: Semaphore,
    factory: Box<dyn Fn() -> C + Send + Sync>,
    created: AtomicUsize,
    max: usize,
}

impl<C: GeometryConnection> GeometryPool<C> {
    pub fn new(min: usize, max: usize, factory: impl Fn() -> C + Send + Sync + 'static) -> Self {
        let max = max.max(1);
        let min = min.clamp(1, max);
        let idle: Vec<C> = (0..min).map(|_| factory()).collect();
        Self {
            created: AtomicUsize::new(idle.len()),
            idle: Mutex::new(idle),
            permits: Semaphore::new(max),
            factory: Box::new(factory),
            max,
        }
    }

    /// Standard sizing: min 1, max 10.
    pub fn with_defaults(factory: impl Fn() -> C + Send + Sync + 'static) -> Self {
        Self::new(1, 10, factory)
    }

    pub fn connections_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Borrow a connection, run the query, return the connection.
    pub async fn district_code(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> Result<Option<u32>, StoreError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("geometry pool closed".into()))?;

        let connection = {
            let mut idle = self.idle.lock().await;
            match idle.pop() {
                Some(connection) => connection,
                None => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    (self.factory)()
                }
            }
        };

        let result = connection.district_code(longitude, latitude).await;

        let mut idle = self.idle.lock().await;
        if idle.len() < self.max {
            idle.push(connection);
        }
        result
    }
}

/// Rectangle-based in-memory stand-in for the polygon table.
#[derive(Debug, Clone, Default)]
pub struct MemoryGeometry {
    districts: Vec<District>,
}

#[derive(Debug, Clone)]
struct District {
    code: u32,
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl MemoryGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a district as its bounding rectangle. First match wins, so
    /// insert more specific districts first.
    pub fn with_district(
        mut self,
        code: u32,
        (min_lon, min_lat): (f64, f64),
        (max_lon, max_lat): (f64, f64),
    ) -> Self {
        self.districts.push(District {
            code,
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        });
        self
    }
}

#[async_trait]
impl GeometryConnection for MemoryGeometry {
    async fn district_code(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> Result<Option<u32>, StoreError> {
        Ok(self
            .districts
            .iter()
            .find(|d| {
                longitude >= d.min_lon
                    && longitude <= d.max_lon
                    && latitude >= d.min_lat
                    && latitude <= d.max_lat
            })
            .map(|d| d.code))
    }
}

/// A connection that always fails, for exercising the 510 path.
#[derive(Debug, Clone, Default)]
pub struct FailingGeometry;

#[async_trait]
impl GeometryConnection for FailingGeometry {
    async fn district_code(&self, _longitude: f64, _latitude: f64) -> Result<Option<u32>, StoreError> {
        Err(StoreError::Unavailable("geometry backend down".into()))
    }
}

/// Tokyo / Sapporo / Osaka rectangles, enough for demos and tests.
pub fn demo_geometry() -> MemoryGeometry {
    MemoryGeometry::new()
        .with_district(130_000, (138.9, 35.5), (140.9, 36.0))
        .with_district(16_000, (140.9, 42.7), (141.9, 43.4))
        .with_district(270_000, (135.0, 34.2), (135.8, 35.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_hits_the_containing_district() {
        let pool = GeometryPool::with_defaults(demo_geometry);
        assert_eq!(
            pool.district_code(139.6917, 35.6895).await.unwrap(),
            Some(130_000)
        );
        assert_eq!(
            pool.district_code(141.3544, 43.0621).await.unwrap(),
            Some(16_000)
        );
        assert_eq!(pool.district_code(0.0, 0.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pool_reuses_connections_under_sequential_load() {
        let pool = GeometryPool::new(1, 10, demo_geometry);
        for _ in 0..50 {
            pool.district_code(139.7, 35.7).await.unwrap();
        }
        assert_eq!(pool.connections_created(), 1);
    }

    #[tokio::test]
    async fn pool_grows_under_concurrent_load_but_stays_bounded() {
        let pool = Arc::new(GeometryPool::new(1, 4, demo_geometry));
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                pool.district_code(139.7, 35.7).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(pool.connections_created() <= 4);
    }

    #[tokio::test]
    async fn failures_surface_as_store_errors() {
        let pool = GeometryPool::with_defaults(|| FailingGeometry);
        assert!(pool.district_code(139.7, 35.7).await.is_err());
    }
}
