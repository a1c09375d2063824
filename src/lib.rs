/*!
# Weather Information Protocol

A compact, bit-packed UDP request/response protocol for weather data, and
the multi-tier pipeline that serves it.

Clients talk to a single endpoint, the **Weather Server**, which routes by
packet type: coordinate lookups go through the **Location Server** (point in
polygon over administrative districts), weather queries through the
**Query Server** (a cached document store keyed by area code), and sensor
reports to the **Report Server** (per-area append-only JSON logs). Two
caches make the pipeline fast: coordinate to area code, and query
fingerprint to decoded weather. A `source` record carried inside the
packets lets the proxy stay stateless across datagrams.

## Layers

- [`packet`]: the wire format — a 128-bit LSB-first fixed header, an
  optional 32-bit data payload, a TLV Extended Field region, a 12-bit
  checksum and hash-based authentication.
- [`net`]: the shared runtime — bounded-concurrency dispatcher, reply
  demultiplexer, packet id generation.
- [`clients`]: stubs for each server, carrying the two caches.
- [`servers`]: the proxy and the three backends.
- [`stores`]: seams to the external collaborators (document store,
  geometry lookup, report log directory).

## Quick start

```no_run
use wipd::clients::WeatherClient;
use wipd::auth::AuthConfig;
use wipd::packet::DataFlags;
use std::time::Duration;

# async fn run() -> Result<(), Box<dyn std::error::Error>> {
let client = WeatherClient::connect(
    "127.0.0.1:4110".parse()?,
    4096,
    Duration::from_secs(10),
    AuthConfig::disabled(),
)
.await?;
let flags = DataFlags::new(true, true, true, false, false);
let weather = client.get_weather_by_coordinates(35.6895, 139.6917, flags, 0).await?;
println!("{:?} {:?}%", weather.weather_code(), weather.pop());
# Ok(())
# }
```
*/

pub mod auth;
pub mod cache;
pub mod clients;
pub mod config;
pub mod net;
pub mod packet;
pub mod servers;
pub mod stores;

/// The most commonly used types in one import.
pub mod prelude {
    pub use crate::auth::{AuthConfig, HashAlgorithm};
    pub use crate::cache::TtlCache;
    pub use crate::clients::{
        ClientError, LocationClient, QueryClient, ReportClient, WeatherClient,
    };
    pub use crate::config::{Endpoint, ServerConfig, ServerRole};
    pub use crate::net::{PacketHandler, PacketIdGenerator, ReplyRouter, UdpServer};
    pub use crate::packet::types::{
        ErrorResponse, LocationRequest, LocationResponse, QueryRequest, QueryResponse, ReportAck,
        ReportRequest,
    };
    pub use crate::packet::{DataFlags, Frame, Header, PacketError, PacketType};
    pub use crate::servers::{LocationServer, QueryServer, ReportServer, WeatherProxy};
}
