//! Shared networking runtime: the per-server datagram dispatcher, the
//! reply demultiplexer client sockets use, and packet id generation.

pub mod dispatcher;
pub mod packet_id;
pub mod reply_router;

pub use dispatcher::{HandlerError, PacketHandler, RequestContext, ServerStats, StatsSnapshot, UdpServer};
pub use packet_id::PacketIdGenerator;
pub use reply_router::ReplyRouter;
