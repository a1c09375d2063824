//! Type 7: the error packet. The numeric error code rides in the slot a
//! Type 3 would use for the weather code.

use std::net::SocketAddr;

use crate::packet::error::{PacketParseError, PacketResult};
use crate::packet::frame::{DataPayload, Frame};
use crate::packet::header::{Header, PacketType};

use super::unix_now;

/// Wire error codes (spec'd taxonomy).
pub mod codes {
    /// Malformed packet.
    pub const BAD_PACKET: u16 = 400;
    /// Authentication failure.
    pub const AUTH: u16 = 401;
    /// Area code unset.
    pub const MISSING_AREA: u16 = 402;
    /// Protocol version mismatch.
    pub const VERSION: u16 = 403;
    /// Length mismatch on send.
    pub const LENGTH: u16 = 404;
    /// Forward to the location server failed.
    pub const LOCATION_FORWARD: u16 = 410;
    /// Forward to the query server failed.
    pub const QUERY_FORWARD: u16 = 420;
    /// Location server internal error.
    pub const LOCATION_INTERNAL: u16 = 510;
    /// Query server internal error.
    pub const QUERY_INTERNAL: u16 = 520;
    /// Other internal error.
    pub const INTERNAL: u16 = 530;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    frame: Frame,
}

impl ErrorResponse {
    pub fn new(packet_id: u16, error_code: u16) -> Self {
        let mut header = Header::new(PacketType::Error, packet_id);
        header.timestamp = unix_now();
        let mut frame = Frame::new(header);
        frame.payload = Some(DataPayload {
            weather_code: error_code,
            temperature: 0,
            pop: 0,
        });
        Self { frame }
    }

    /// Attach the origin address. Encoding then sets ex_flag, so an error
    /// that knows its source always announces the extended region.
    pub fn with_source(mut self, source: SocketAddr) -> PacketResult<Self> {
        self.frame.ext.set_source(source)?;
        Ok(self)
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::Error {
            return Err(PacketParseError::InvalidPacketType(frame.header.packet_type as u8).into());
        }
        Ok(Self { frame })
    }

    pub fn decode(data: &[u8]) -> PacketResult<Self> {
        Self::from_frame(Frame::decode(data)?)
    }

    pub fn encode(&self) -> PacketResult<Vec<u8>> {
        self.frame.encode()
    }

    pub fn error_code(&self) -> u16 {
        self.frame.payload.map(|p| p.weather_code).unwrap_or(0)
    }

    pub fn packet_id(&self) -> u16 {
        self.frame.header.packet_id
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.frame.ext.source()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_rides_in_the_weather_slot() {
        let err = ErrorResponse::new(321, codes::AUTH);
        let wire = err.encode().unwrap();
        assert_eq!(wire.len(), 20);
        let decoded = ErrorResponse::decode(&wire).unwrap();
        assert_eq!(decoded.error_code(), 401);
        assert_eq!(decoded.packet_id(), 321);
        assert!(decoded.source().is_none());
    }

    #[test]
    fn source_forces_extended_flag() {
        let err = ErrorResponse::new(1, codes::INTERNAL)
            .with_source("127.0.0.1:9999".parse().unwrap())
            .unwrap();
        let wire = err.encode().unwrap();
        let decoded = ErrorResponse::decode(&wire).unwrap();
        assert!(decoded.frame().header.ex_flag);
        assert_eq!(decoded.source().unwrap(), "127.0.0.1:9999".parse().unwrap());
    }
}
