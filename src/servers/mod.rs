//! The four servers: the Weather Server proxy plus its three backends.

pub mod location;
pub mod query;
pub mod report;
pub mod weather;

pub use location::LocationServer;
pub use query::{NoopRefresh, QueryScheduler, QueryServer, RefreshHooks};
pub use report::ReportServer;
pub use weather::WeatherProxy;
