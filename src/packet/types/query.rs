//! Type 2 (QueryRequest) and Type 3 (QueryResponse): area-code-keyed
//! weather queries and their fixed-payload answers.

use crate::packet::error::{PacketParseError, PacketResult};
use crate::packet::frame::{decode_temperature, encode_temperature, DataPayload, Frame};
use crate::packet::header::{DataFlags, Header, PacketType};

use super::unix_now;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    frame: Frame,
}

impl QueryRequest {
    pub fn new(packet_id: u16, area_code: u32, flags: DataFlags, day: u8) -> Self {
        let mut header = Header::new(PacketType::QueryRequest, packet_id);
        header.flags = flags;
        header.day = day;
        header.timestamp = unix_now();
        header.area_code = area_code;
        Self {
            frame: Frame::new(header),
        }
    }

    /// Build the follow-up query out of a Type 1 answer, keeping the
    /// packet id, flags, day, resolved area, coordinates and source so the
    /// eventual Type 3 can find its way back to the origin.
    pub fn from_location_response(response: &Frame) -> PacketResult<Self> {
        let mut request = Self::new(
            response.header.packet_id,
            response.header.area_code,
            response.header.flags,
            response.header.day,
        );
        request.frame.header.version = response.header.version;
        if let Some(source) = response.ext.source() {
            request.frame.ext.set_source(source)?;
        }
        if let Some((lat, lon)) = response.ext.coordinates() {
            request.frame.ext.set_coordinates(lat, lon)?;
        }
        Ok(request)
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::QueryRequest {
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

    pub fn flags(&self) -> DataFlags {
        self.frame.header.flags
    }

    pub fn day(&self) -> u8 {
        self.frame.header.day
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

/// The flag-selected weather values a response carries. Temperature is in
/// celsius here; the +100 wire bias is applied at encode time only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherAnswer {
    pub weather_code: Option<u16>,
    pub temperature_c: Option<i16>,
    pub pop: Option<u8>,
    pub alerts: Vec<String>,
    pub disasters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    frame: Frame,
}

impl QueryResponse {
    /// Build a Type 3 for `request` out of `answer`, echoing coordinates
    /// when the request carried them. The `source` record is intentionally
    /// NOT copied here; the proxy adds or strips it on its own legs.
    pub fn for_request(request: &Frame, answer: &WeatherAnswer) -> PacketResult<Self> {
        let mut header = Header::new(PacketType::QueryResponse, request.header.packet_id);
        header.version = request.header.version;
        header.flags = request.header.flags;
        header.day = request.header.day;
        header.timestamp = unix_now();
        header.area_code = request.header.area_code;

        let mut frame = Frame::new(header);
        frame.payload = Some(DataPayload {
            weather_code: answer.weather_code.unwrap_or(0),
            temperature: match answer.temperature_c {
                Some(celsius) => encode_temperature(celsius)?,
                None => 0,
            },
            pop: answer.pop.unwrap_or(0),
        });
        for alert in &answer.alerts {
            frame.ext.add_alert(alert)?;
        }
        for disaster in &answer.disasters {
            frame.ext.add_disaster(disaster)?;
        }
        if let Some((lat, lon)) = request.ext.coordinates() {
            frame.ext.set_coordinates(lat, lon)?;
        }
        Ok(Self { frame })
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::QueryResponse {
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

    pub fn area_code_str(&self) -> String {
        self.frame.header.area_code_str()
    }

    pub fn weather_code(&self) -> Option<u16> {
        let flags = self.frame.header.flags;
        self.frame
            .payload
            .filter(|_| flags.weather)
            .map(|p| p.weather_code)
    }

    pub fn temperature_c(&self) -> Option<i16> {
        let flags = self.frame.header.flags;
        self.frame
            .payload
            .filter(|_| flags.temperature)
            .map(|p| decode_temperature(p.temperature))
    }

    pub fn pop(&self) -> Option<u8> {
        let flags = self.frame.header.flags;
        self.frame.payload.filter(|_| flags.pop).map(|p| p.pop)
    }

    pub fn alerts(&self) -> Vec<String> {
        self.frame.ext.alerts()
    }

    pub fn disasters(&self) -> Vec<String> {
        self.frame.ext.disasters()
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

#[cfg(test)]
mod tests {
    use super::*;

    fn wtp_flags() -> DataFlags {
        DataFlags::new(true, true, true, false, false)
    }

    #[test]
    fn request_round_trip() {
        let req = QueryRequest::new(42, 11_000, wtp_flags(), 1);
        let wire = req.encode().unwrap();
        assert_eq!(wire.len(), 16);
        let decoded = QueryRequest::decode(&wire).unwrap();
        assert_eq!(decoded.area_code(), 11_000);
        assert_eq!(decoded.day(), 1);
        assert_eq!(decoded.flags(), wtp_flags());
    }

    #[test]
    fn response_selects_by_flags() {
        let req = QueryRequest::new(7, 130_000, wtp_flags(), 0);
        let answer = WeatherAnswer {
            weather_code: Some(100),
            temperature_c: Some(25),
            pop: Some(30),
            ..Default::default()
        };
        let resp = QueryResponse::for_request(req.frame(), &answer).unwrap();
        let wire = resp.encode().unwrap();
        let decoded = QueryResponse::decode(&wire).unwrap();
        assert_eq!(decoded.weather_code(), Some(100));
        assert_eq!(decoded.temperature_c(), Some(25));
        assert_eq!(decoded.pop(), Some(30));
        assert_eq!(decoded.area_code_str(), "130000");

        // A flag the request never asked for reads as absent even though
        // the payload slot physically exists.
        let flagless = QueryRequest::new(8, 130_000, DataFlags::new(true, false, false, false, false), 0);
        let resp = QueryResponse::for_request(flagless.frame(), &answer).unwrap();
        let decoded = QueryResponse::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded.weather_code(), Some(100));
        assert_eq!(decoded.temperature_c(), None);
        assert_eq!(decoded.pop(), None);
    }

    #[test]
    fn response_carries_alerts_and_coordinates() {
        let mut req = QueryRequest::new(
            3,
            11_000,
            DataFlags::new(true, false, false, true, false),
            0,
        );
        req.frame_mut().ext.set_coordinates(43.06, 141.35).unwrap();
        let answer = WeatherAnswer {
            weather_code: Some(100),
            alerts: vec!["大雨警報".to_string()],
            ..Default::default()
        };
        let resp = QueryResponse::for_request(req.frame(), &answer).unwrap();
        let decoded = QueryResponse::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded.alerts(), vec!["大雨警報"]);
        let (lat, lon) = decoded.coordinates().unwrap();
        assert!((lat - 43.06).abs() < 1e-6);
        assert!((lon - 141.35).abs() < 1e-6);
    }

    #[test]
    fn from_location_response_keeps_routing_state() {
        use crate::packet::types::location::{LocationRequest, LocationResponse};

        let mut loc_req = LocationRequest::new(99, 35.6895, 139.6917, wtp_flags(), 0).unwrap();
        loc_req
            .frame_mut()
            .ext
            .set_source("198.51.100.2:40000".parse().unwrap())
            .unwrap();
        let loc_resp = LocationResponse::for_request(loc_req.frame(), 130_000).unwrap();

        let query = QueryRequest::from_location_response(loc_resp.frame()).unwrap();
        assert_eq!(query.area_code(), 130_000);
        assert_eq!(query.frame().header.packet_id, 99);
        assert_eq!(query.flags(), wtp_flags());
        assert_eq!(
            query.frame().ext.source().unwrap(),
            "198.51.100.2:40000".parse().unwrap()
        );
        assert!(query.frame().ext.coordinates().is_some());
    }
}
