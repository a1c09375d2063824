//! The Extended Field TLV region.
//!
//! Each record is `[length:10][key:6][value: length * 8]`. The 16-bit record
//! header lands in the LSB-first stream as a little-endian u16 of
//! `length << 6 | key`. Value integers are big-endian, and because the value
//! bits are packed LSB-first the value's bytes appear low-order-first on the
//! wire; strings are therefore byte-reversed in transit. A zero header
//! terminates the region. Unknown keys are carried through untouched.

use std::fmt;
use std::net::SocketAddr;

use super::error::{FieldError, PacketParseError, PacketResult};

/// Known Extended Field keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtKey {
    Alert,
    Disaster,
    Latitude,
    Longitude,
    Source,
    AuthHash,
    Other(u8),
}

impl ExtKey {
    pub const MAX_KEY: u8 = 0x3F;
    pub const MAX_VALUE_LEN: usize = 0x3FF;

    pub fn code(self) -> u8 {
        match self {
            ExtKey::Alert => 1,
            ExtKey::Disaster => 2,
            ExtKey::Latitude => 33,
            ExtKey::Longitude => 34,
            ExtKey::Source => 40,
            ExtKey::AuthHash => 41,
            ExtKey::Other(k) => k,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ExtKey::Alert,
            2 => ExtKey::Disaster,
            33 => ExtKey::Latitude,
            34 => ExtKey::Longitude,
            40 => ExtKey::Source,
            41 => ExtKey::AuthHash,
            other => ExtKey::Other(other),
        }
    }

    /// Alert and disaster records accumulate into ordered lists; every
    /// other key is single-valued with last-wins semantics.
    pub fn is_list(self) -> bool {
        matches!(self, ExtKey::Alert | ExtKey::Disaster)
    }
}

impl fmt::Display for ExtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtKey::Alert => write!(f, "alert"),
            ExtKey::Disaster => write!(f, "disaster"),
            ExtKey::Latitude => write!(f, "latitude"),
            ExtKey::Longitude => write!(f, "longitude"),
            ExtKey::Source => write!(f, "source"),
            ExtKey::AuthHash => write!(f, "auth_hash"),
            ExtKey::Other(k) => write!(f, "key{k}"),
        }
    }
}

/// One record, value held in canonical (big-endian / natural string) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtRecord {
    pub key: ExtKey,
    pub value: Vec<u8>,
}

/// Ordered record list with typed accessors for the known keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedField {
    records: Vec<ExtRecord>,
}

const COORDINATE_SCALE: f64 = 1_000_000.0;

impl ExtendedField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[ExtRecord] {
        &self.records
    }

    /// Append a raw record, preserving insertion order on the wire.
    pub fn push(&mut self, key: ExtKey, value: Vec<u8>) -> PacketResult<()> {
        if value.is_empty() || value.len() > ExtKey::MAX_VALUE_LEN {
            return Err(FieldError::out_of_range(
                "extended_value",
                value.len(),
                ExtKey::MAX_VALUE_LEN,
            )
            .into());
        }
        self.records.push(ExtRecord { key, value });
        Ok(())
    }

    /// Drop every record under `key`. Returns true when something was removed.
    pub fn remove(&mut self, key: ExtKey) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.key != key);
        self.records.len() != before
    }

    /// Last record under a single-valued key.
    fn scalar(&self, key: ExtKey) -> Option<&[u8]> {
        self.records
            .iter()
            .rev()
            .find(|r| r.key == key)
            .map(|r| r.value.as_slice())
    }

    fn strings(&self, key: ExtKey) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.key == key)
            .filter_map(|r| String::from_utf8(r.value.clone()).ok())
            .collect()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.strings(ExtKey::Alert)
    }

    pub fn disasters(&self) -> Vec<String> {
        self.strings(ExtKey::Disaster)
    }

    pub fn add_alert(&mut self, text: &str) -> PacketResult<()> {
        self.push(ExtKey::Alert, text.as_bytes().to_vec())
    }

    pub fn add_disaster(&mut self, text: &str) -> PacketResult<()> {
        self.push(ExtKey::Disaster, text.as_bytes().to_vec())
    }

    fn coordinate(&self, key: ExtKey) -> Option<f64> {
        let raw = self.scalar(key)?;
        if raw.len() != 4 {
            return None;
        }
        let micro = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Some(micro as f64 / COORDINATE_SCALE)
    }

    fn set_coordinate(&mut self, key: ExtKey, degrees: f64, bound: f64) -> PacketResult<()> {
        if !degrees.is_finite() || degrees.abs() > bound {
            return Err(FieldError::out_of_range(
                if key == ExtKey::Latitude { "latitude" } else { "longitude" },
                degrees,
                bound,
            )
            .into());
        }
        self.remove(key);
        let micro = (degrees * COORDINATE_SCALE).round() as i32;
        self.push(key, micro.to_be_bytes().to_vec())
    }

    pub fn latitude(&self) -> Option<f64> {
        self.coordinate(ExtKey::Latitude)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.coordinate(ExtKey::Longitude)
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude()?, self.longitude()?))
    }

    pub fn set_latitude(&mut self, degrees: f64) -> PacketResult<()> {
        self.set_coordinate(ExtKey::Latitude, degrees, 90.0)
    }

    pub fn set_longitude(&mut self, degrees: f64) -> PacketResult<()> {
        self.set_coordinate(ExtKey::Longitude, degrees, 180.0)
    }

    pub fn set_coordinates(&mut self, latitude: f64, longitude: f64) -> PacketResult<()> {
        self.set_latitude(latitude)?;
        self.set_longitude(longitude)
    }

    /// The origin address carried through the proxy pipeline as "ip:port".
    pub fn source(&self) -> Option<SocketAddr> {
        let raw = self.scalar(ExtKey::Source)?;
        let text = std::str::from_utf8(raw).ok()?;
        text.parse().ok()
    }

    pub fn set_source(&mut self, addr: SocketAddr) -> PacketResult<()> {
        self.remove(ExtKey::Source);
        self.push(ExtKey::Source, addr.to_string().into_bytes())
    }

    pub fn auth_hash(&self) -> Option<&[u8]> {
        self.scalar(ExtKey::AuthHash)
    }

    pub fn set_auth_hash(&mut self, digest: Vec<u8>) -> PacketResult<()> {
        self.remove(ExtKey::AuthHash);
        self.push(ExtKey::AuthHash, digest)
    }

    /// Serialize the region. Record order is insertion order; value bytes go
    /// out low-order-first to match the LSB-first bit packing.
    pub fn to_wire(&self) -> Vec<u8> {
        let total: usize = self.records.iter().map(|r| 2 + r.value.len()).sum();
        let mut out = Vec::with_capacity(total);
        for record in &self.records {
            let header = ((record.value.len() as u16) << 6) | (record.key.code() as u16 & 0x3F);
            out.extend_from_slice(&header.to_le_bytes());
            out.extend(record.value.iter().rev());
        }
        out
    }

    /// Parse a region bounded by the input length. A zero header ends the
    /// walk; a record whose declared value overruns the buffer is an error.
    pub fn from_wire(data: &[u8]) -> Result<Self, PacketParseError> {
        let mut field = ExtendedField::new();
        let mut pos = 0usize;
        while pos + 2 <= data.len() {
            let header = u16::from_le_bytes([data[pos], data[pos + 1]]);
            if header == 0 {
                break;
            }
            pos += 2;
            let length = ((header >> 6) & 0x3FF) as usize;
            let key = ExtKey::from_code((header & 0x3F) as u8);
            if length == 0 {
                continue;
            }
            if pos + length > data.len() {
                return Err(PacketParseError::MalformedExtended(format!(
                    "record '{key}' declares {length} bytes but only {} remain",
                    data.len() - pos
                )));
            }
            let mut value: Vec<u8> = data[pos..pos + length].to_vec();
            value.reverse();
            field.records.push(ExtRecord { key, value });
            pos += length;
        }
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_order_and_values() {
        let mut field = ExtendedField::new();
        field.add_alert("大雨警報").unwrap();
        field.add_alert("洪水注意報").unwrap();
        field.add_disaster("土砂災害").unwrap();
        field.set_coordinates(35.6895, 139.6917).unwrap();
        field
            .set_source("192.168.1.10:4110".parse().unwrap())
            .unwrap();

        let wire = field.to_wire();
        let decoded = ExtendedField::from_wire(&wire).unwrap();
        assert_eq!(decoded, field);
        assert_eq!(decoded.alerts(), vec!["大雨警報", "洪水注意報"]);
        assert_eq!(decoded.disasters(), vec!["土砂災害"]);
    }

    #[test]
    fn value_bytes_are_reversed_on_the_wire() {
        let mut field = ExtendedField::new();
        field.push(ExtKey::Source, b"ab".to_vec()).unwrap();
        let wire = field.to_wire();
        // header: length 2, key 40 -> 0x00A8 little-endian
        assert_eq!(&wire[..2], &[0xA8, 0x00]);
        assert_eq!(&wire[2..], &[b'b', b'a']);
    }

    #[test]
    fn coordinates_survive_to_micro_degree_precision() {
        let cases = [
            (35.6895, 139.6917),
            (-89.999999, 179.999999),
            (0.0, 0.0),
            (90.0, -180.0),
        ];
        for (lat, lon) in cases {
            let mut field = ExtendedField::new();
            field.set_coordinates(lat, lon).unwrap();
            let wire = field.to_wire();
            let decoded = ExtendedField::from_wire(&wire).unwrap();
            assert!((decoded.latitude().unwrap() - lat).abs() < 1e-6);
            assert!((decoded.longitude().unwrap() - lon).abs() < 1e-6);
        }
    }

    #[test]
    fn coordinate_out_of_range_is_rejected() {
        let mut field = ExtendedField::new();
        assert!(field.set_latitude(90.000001).is_err());
        assert!(field.set_longitude(-180.1).is_err());
    }

    #[test]
    fn zero_header_terminates() {
        let mut field = ExtendedField::new();
        field.add_alert("x").unwrap();
        let mut wire = field.to_wire();
        wire.extend_from_slice(&[0, 0, 0xFF, 0xFF]); // terminator then junk
        let decoded = ExtendedField::from_wire(&wire).unwrap();
        assert_eq!(decoded.alerts(), vec!["x"]);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn overrunning_record_is_an_error() {
        // length 8, key 1, but only 2 value bytes follow
        let header = (8u16 << 6) | 1;
        let mut wire = header.to_le_bytes().to_vec();
        wire.extend_from_slice(&[1, 2]);
        assert!(ExtendedField::from_wire(&wire).is_err());
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let header = (3u16 << 6) | 17;
        let mut wire = header.to_le_bytes().to_vec();
        wire.extend_from_slice(&[3, 2, 1]);
        let decoded = ExtendedField::from_wire(&wire).unwrap();
        assert_eq!(decoded.records()[0].key, ExtKey::Other(17));
        assert_eq!(decoded.records()[0].value, vec![1, 2, 3]);
        assert_eq!(decoded.to_wire(), wire);
    }

    #[test]
    fn scalar_keys_are_last_wins() {
        let mut field = ExtendedField::new();
        field.push(ExtKey::Source, b"1.2.3.4:80".to_vec()).unwrap();
        field.push(ExtKey::Source, b"5.6.7.8:90".to_vec()).unwrap();
        assert_eq!(field.source().unwrap(), "5.6.7.8:90".parse().unwrap());
    }

    #[test]
    fn source_round_trip() {
        let mut field = ExtendedField::new();
        let addr: SocketAddr = "10.0.0.7:4110".parse().unwrap();
        field.set_source(addr).unwrap();
        let decoded = ExtendedField::from_wire(&field.to_wire()).unwrap();
        assert_eq!(decoded.source(), Some(addr));
        // replacing does not accumulate records
        field.set_source("10.0.0.8:4111".parse().unwrap()).unwrap();
        assert_eq!(field.records().len(), 1);
    }
}
