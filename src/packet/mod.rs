//! Wire format for the Weather Information Protocol.
//!
//! A packet is a little-endian byte stream holding a 128-bit fixed header
//! packed LSB-first, an optional 32-bit data payload (weather code,
//! temperature, precipitation probability), and an extensible TLV region.
//! The codec here owns field range validation, the 12-bit checksum and the
//! Extended Field encoding; the typed wrappers in [`types`] give each packet
//! type a purpose-built constructor surface.

pub mod checksum;
pub mod error;
pub mod extended;
pub mod frame;
pub mod header;
pub mod types;

pub use error::{ChecksumError, FieldError, PacketError, PacketParseError, PacketResult};
pub use extended::{ExtKey, ExtendedField};
pub use frame::{DataPayload, Frame};
pub use header::{DataFlags, Header, PacketType};
