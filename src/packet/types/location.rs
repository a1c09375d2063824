//! Type 0 (LocationRequest) and Type 1 (LocationResponse): coordinate to
//! area-code resolution.

use crate::packet::error::{PacketParseError, PacketResult};
use crate::packet::frame::Frame;
use crate::packet::header::{DataFlags, Header, PacketType};

use super::unix_now;

/// Coordinate resolution request. Carries latitude/longitude in the
/// Extended Field and the data flags the eventual weather query will use.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRequest {
    frame: Frame,
}

impl LocationRequest {
    pub fn new(
        packet_id: u16,
        latitude: f64,
        longitude: f64,
        flags: DataFlags,
        day: u8,
    ) -> PacketResult<Self> {
        let mut header = Header::new(PacketType::LocationRequest, packet_id);
        header.flags = flags;
        header.day = day;
        header.timestamp = unix_now();
        let mut frame = Frame::new(header);
        frame.ext.set_coordinates(latitude, longitude)?;
        Ok(Self { frame })
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::LocationRequest {
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

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.frame.ext.coordinates()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

/// Coordinate resolution response: the request's flags and day preserved so
/// the proxy can build the follow-up query, the resolved area code in the
/// header, coordinates echoed, source carried forward unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationResponse {
    frame: Frame,
}

impl LocationResponse {
    /// Build the Type 1 answer for `request` with the resolved `area_code`.
    pub fn for_request(request: &Frame, area_code: u32) -> PacketResult<Self> {
        let mut header = Header::new(PacketType::LocationResponse, request.header.packet_id);
        header.version = request.header.version;
        header.flags = request.header.flags;
        header.day = request.header.day;
        header.timestamp = unix_now();
        header.area_code = area_code;

        let mut frame = Frame::new(header);
        if let Some(source) = request.ext.source() {
            frame.ext.set_source(source)?;
        }
        if let Some((lat, lon)) = request.ext.coordinates() {
            frame.ext.set_coordinates(lat, lon)?;
        }
        Ok(Self { frame })
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::LocationResponse {
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

    pub fn area_code(&self) -> u32 {
        self.frame.header.area_code
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.frame.ext.coordinates()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}
