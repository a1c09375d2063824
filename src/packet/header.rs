//! The 128-bit fixed header shared by every packet type.

use bitvec::prelude::*;

use super::error::{FieldError, PacketParseError, PacketResult};

/// Size of the fixed header in bytes.
pub const HEADER_BYTES: usize = 16;
/// Maximum packet id (12 bits, wraps mod 4096).
pub const MAX_PACKET_ID: u16 = 0x0FFF;
/// Maximum area code (20 bits).
pub const MAX_AREA_CODE: u32 = (1 << 20) - 1;
/// Maximum forecast day offset (3 bits).
pub const MAX_DAY: u8 = 7;
/// Protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// The 3-bit packet type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    LocationRequest = 0,
    LocationResponse = 1,
    QueryRequest = 2,
    QueryResponse = 3,
    ReportRequest = 4,
    ReportAck = 5,
    Error = 7,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Result<Self, PacketParseError> {
        match value {
            0 => Ok(PacketType::LocationRequest),
            1 => Ok(PacketType::LocationResponse),
            2 => Ok(PacketType::QueryRequest),
            3 => Ok(PacketType::QueryResponse),
            4 => Ok(PacketType::ReportRequest),
            5 => Ok(PacketType::ReportAck),
            7 => Ok(PacketType::Error),
            other => Err(PacketParseError::InvalidPacketType(other)),
        }
    }

    /// Types whose layout includes the 32-bit data payload region.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            PacketType::QueryResponse | PacketType::ReportRequest | PacketType::Error
        )
    }
}

/// The five data-selection flags, kept together because their bitmap is the
/// cache fingerprint component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataFlags {
    pub weather: bool,
    pub temperature: bool,
    pub pop: bool,
    pub alert: bool,
    pub disaster: bool,
}

impl DataFlags {
    pub fn new(weather: bool, temperature: bool, pop: bool, alert: bool, disaster: bool) -> Self {
        Self {
            weather,
            temperature,
            pop,
            alert,
            disaster,
        }
    }

    /// At least one flag must be set for a query to mean anything.
    pub fn any(&self) -> bool {
        self.weather || self.temperature || self.pop || self.alert || self.disaster
    }

    /// Bitmap form, weather in bit 0 through disaster in bit 4.
    pub fn bitmap(&self) -> u8 {
        (self.weather as u8)
            | (self.temperature as u8) << 1
            | (self.pop as u8) << 2
            | (self.alert as u8) << 3
            | (self.disaster as u8) << 4
    }

    /// True when every flag set in `other` is also set here.
    pub fn covers(&self, other: &DataFlags) -> bool {
        (self.bitmap() & other.bitmap()) == other.bitmap()
    }
}

/// Immutable header value. Field mutation happens by constructing a new
/// header; checksum recomputation is a step of encoding, never a side
/// effect of assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub packet_id: u16,
    pub packet_type: PacketType,
    pub flags: DataFlags,
    pub ex_flag: bool,
    pub day: u8,
    pub request_auth: bool,
    pub response_auth: bool,
    pub timestamp: u64,
    pub area_code: u32,
}

impl Header {
    pub fn new(packet_type: PacketType, packet_id: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_id,
            packet_type,
            flags: DataFlags::default(),
            ex_flag: false,
            day: 0,
            request_auth: false,
            response_auth: false,
            timestamp: 0,
            area_code: 0,
        }
    }

    /// Area code in its canonical external form: six zero-padded digits.
    pub fn area_code_str(&self) -> String {
        format!("{:06}", self.area_code)
    }

    /// An area code of zero means "unset".
    pub fn has_area_code(&self) -> bool {
        self.area_code != 0
    }

    pub fn validate(&self) -> PacketResult<()> {
        if self.version >= 16 {
            return Err(FieldError::out_of_range("version", self.version, 15).into());
        }
        if self.packet_id > MAX_PACKET_ID {
            return Err(FieldError::out_of_range("packet_id", self.packet_id, MAX_PACKET_ID).into());
        }
        if self.day > MAX_DAY {
            return Err(FieldError::out_of_range("day", self.day, MAX_DAY).into());
        }
        if self.area_code > MAX_AREA_CODE {
            return Err(FieldError::out_of_range("area_code", self.area_code, MAX_AREA_CODE).into());
        }
        Ok(())
    }

    /// Pack into the first 16 bytes of `out`. The checksum slot is written
    /// as zero; `embed_checksum12` fills it once the full buffer exists.
    pub fn encode_into(&self, out: &mut [u8]) {
        let bits = BitSlice::<u8, Lsb0>::from_slice_mut(&mut out[..HEADER_BYTES]);
        bits[0..4].store(self.version);
        bits[4..16].store(self.packet_id);
        bits[16..19].store(self.packet_type as u8);
        bits[19..20].store(self.flags.weather as u8);
        bits[20..21].store(self.flags.temperature as u8);
        bits[21..22].store(self.flags.pop as u8);
        bits[22..23].store(self.flags.alert as u8);
        bits[23..24].store(self.flags.disaster as u8);
        bits[24..25].store(self.ex_flag as u8);
        bits[25..26].store(self.request_auth as u8);
        bits[26..27].store(self.response_auth as u8);
        bits[27..30].store(self.day);
        bits[30..32].store(0u8); // reserved
        bits[32..96].store(self.timestamp);
        bits[96..116].store(self.area_code);
        bits[116..128].store(0u16);
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketParseError> {
        if data.len() < HEADER_BYTES {
            return Err(PacketParseError::Truncated {
                required: HEADER_BYTES,
                actual: data.len(),
            });
        }
        let bits = BitSlice::<u8, Lsb0>::from_slice(&data[..HEADER_BYTES]);
        let packet_type = PacketType::from_u8(bits[16..19].load())?;
        Ok(Self {
            version: bits[0..4].load(),
            packet_id: bits[4..16].load(),
            packet_type,
            flags: DataFlags {
                weather: bits[19],
                temperature: bits[20],
                pop: bits[21],
                alert: bits[22],
                disaster: bits[23],
            },
            ex_flag: bits[24],
            request_auth: bits[25],
            response_auth: bits[26],
            day: bits[27..30].load(),
            timestamp: bits[32..96].load(),
            area_code: bits[96..116].load(),
        })
    }
}

/// Parse a 6-digit area code string into its 20-bit integer form.
pub fn parse_area_code(s: &str) -> Result<u32, FieldError> {
    let code: u32 = s
        .parse()
        .map_err(|_| FieldError::out_of_range("area_code", s, "6 decimal digits"))?;
    if code > MAX_AREA_CODE {
        return Err(FieldError::out_of_range("area_code", code, MAX_AREA_CODE));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        let mut h = Header::new(PacketType::QueryRequest, 123);
        h.flags = DataFlags::new(true, true, true, false, false);
        h.day = 2;
        h.timestamp = 1_700_000_000;
        h.area_code = 130_000;
        h
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_BYTES];
        header.encode_into(&mut buf);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn packet_id_occupies_bits_4_to_16() {
        let mut h = Header::new(PacketType::LocationRequest, 0x0FFF);
        h.version = 1;
        let mut buf = [0u8; HEADER_BYTES];
        h.encode_into(&mut buf);
        let value = u16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(value & 0x0F, 1);
        assert_eq!((value >> 4) & 0x0FFF, 0x0FFF);
    }

    #[test]
    fn rejects_type_6() {
        assert!(PacketType::from_u8(6).is_err());
        assert_eq!(PacketType::from_u8(7).unwrap(), PacketType::Error);
    }

    #[test]
    fn validate_catches_wide_fields() {
        let mut h = sample_header();
        h.area_code = 1 << 20;
        assert!(h.validate().is_err());
        h = sample_header();
        h.day = 8;
        assert!(h.validate().is_err());
    }

    #[test]
    fn area_code_string_is_zero_padded() {
        let mut h = Header::new(PacketType::QueryRequest, 1);
        h.area_code = 11000;
        assert_eq!(h.area_code_str(), "011000");
        assert_eq!(parse_area_code("011000").unwrap(), 11000);
        assert_eq!(Header::new(PacketType::QueryRequest, 1).area_code_str(), "000000");
    }

    #[test]
    fn flag_bitmap_and_coverage() {
        let full = DataFlags::new(true, true, true, true, true);
        let wtp = DataFlags::new(true, true, true, false, false);
        assert_eq!(wtp.bitmap(), 0b00111);
        assert!(full.covers(&wtp));
        assert!(!wtp.covers(&full));
        assert!(wtp.covers(&wtp));
    }
}
