//! The generic packet frame: header + optional data payload + TLV region.
//!
//! Checksum embedding is the last step of `encode`; verification is the
//! first step of `decode`. No partial packets are ever produced.

use bitvec::prelude::*;

use super::checksum::{calc_checksum12, embed_checksum12, stored_checksum, verify_checksum12, MIN_PACKET_BYTES};
use super::error::{ChecksumError, FieldError, PacketParseError, PacketResult};
use super::extended::ExtendedField;
use super::header::{Header, HEADER_BYTES};

/// Fixed 32-bit payload carried by query responses, sensor reports and
/// error packets (the error code rides in the weather_code slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataPayload {
    pub weather_code: u16,
    /// On-wire temperature: actual celsius + 100.
    pub temperature: u8,
    pub pop: u8,
}

/// Bias added to celsius temperatures on the wire.
pub const TEMPERATURE_BIAS: i16 = 100;

/// Convert a celsius value into its biased wire byte.
pub fn encode_temperature(celsius: i16) -> PacketResult<u8> {
    if !(-100..=155).contains(&celsius) {
        return Err(FieldError::out_of_range("temperature", celsius, "-100..=155").into());
    }
    Ok((celsius + TEMPERATURE_BIAS) as u8)
}

/// Recover celsius from the biased wire byte.
pub fn decode_temperature(wire: u8) -> i16 {
    wire as i16 - TEMPERATURE_BIAS
}

const PAYLOAD_BYTES: usize = 4;
const PAYLOAD_START: usize = HEADER_BYTES;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub payload: Option<DataPayload>,
    pub ext: ExtendedField,
}

impl Frame {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            payload: None,
            ext: ExtendedField::new(),
        }
    }

    fn fixed_len(&self) -> usize {
        if self.header.packet_type.carries_payload() {
            HEADER_BYTES + PAYLOAD_BYTES
        } else {
            HEADER_BYTES
        }
    }

    /// Serialize, validate field ranges, and embed the checksum.
    ///
    /// The ex_flag written to the wire is derived from the region contents,
    /// which is what guarantees an error packet carrying a source record
    /// always announces its extended region.
    pub fn encode(&self) -> PacketResult<Vec<u8>> {
        self.header.validate()?;
        if let Some(p) = &self.payload {
            if p.pop > 100 {
                return Err(FieldError::out_of_range("pop", p.pop, 100).into());
            }
        }

        let ext_wire = self.ext.to_wire();
        let mut out = vec![0u8; self.fixed_len() + ext_wire.len()];

        let mut header = self.header;
        header.ex_flag = !self.ext.is_empty();
        header.encode_into(&mut out);

        if self.header.packet_type.carries_payload() {
            let payload = self.payload.unwrap_or_default();
            let bits =
                BitSlice::<u8, Lsb0>::from_slice_mut(&mut out[PAYLOAD_START..PAYLOAD_START + PAYLOAD_BYTES]);
            bits[0..16].store(payload.weather_code);
            bits[16..24].store(payload.temperature);
            bits[24..32].store(payload.pop);
        }

        out[self.fixed_len()..].copy_from_slice(&ext_wire);
        if out.len() < MIN_PACKET_BYTES {
            out.resize(MIN_PACKET_BYTES, 0);
        }
        embed_checksum12(&mut out);
        Ok(out)
    }

    /// Verify the checksum, then parse the header, payload and TLV region.
    pub fn decode(data: &[u8]) -> PacketResult<Self> {
        if data.len() < HEADER_BYTES {
            return Err(PacketParseError::Truncated {
                required: HEADER_BYTES,
                actual: data.len(),
            }
            .into());
        }
        if !verify_checksum12(data) {
            let mut scratch = data.to_vec();
            scratch[14] &= 0x0F;
            scratch[15] = 0;
            return Err(ChecksumError {
                expected: calc_checksum12(&scratch),
                actual: stored_checksum(data),
            }
            .into());
        }

        let header = Header::decode(data)?;
        let mut frame = Frame::new(header);

        let mut ext_start = HEADER_BYTES;
        if header.packet_type.carries_payload() {
            if data.len() < HEADER_BYTES + PAYLOAD_BYTES {
                return Err(PacketParseError::Truncated {
                    required: HEADER_BYTES + PAYLOAD_BYTES,
                    actual: data.len(),
                }
                .into());
            }
            let bits =
                BitSlice::<u8, Lsb0>::from_slice(&data[PAYLOAD_START..PAYLOAD_START + PAYLOAD_BYTES]);
            frame.payload = Some(DataPayload {
                weather_code: bits[0..16].load(),
                temperature: bits[16..24].load(),
                pop: bits[24..32].load(),
            });
            ext_start += PAYLOAD_BYTES;
        }

        if header.ex_flag && data.len() > ext_start {
            frame.ext = ExtendedField::from_wire(&data[ext_start..])?;
        }
        Ok(frame)
    }

    /// Peek at the 12-bit packet id without full decoding. Used by the
    /// reply router to correlate datagrams on a shared socket.
    pub fn peek_packet_id(data: &[u8]) -> Option<u16> {
        if data.len() < 2 {
            return None;
        }
        let value = u16::from_le_bytes([data[0], data[1]]);
        Some((value >> 4) & 0x0FFF)
    }
}
