//! Type 4 (ReportRequest) and Type 5 (ReportAck): sensor data submission.

use crate::packet::error::{PacketParseError, PacketResult};
use crate::packet::frame::{decode_temperature, encode_temperature, DataPayload, Frame};
use crate::packet::header::{Header, PacketType};

use super::unix_now;

/// A sensor submission. Flags mark which payload slots are meaningful;
/// alerts and disasters ride in the Extended Field.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    frame: Frame,
}

impl ReportRequest {
    pub fn new(
        packet_id: u16,
        area_code: u32,
        weather_code: Option<u16>,
        temperature_c: Option<i16>,
        pop: Option<u8>,
        alerts: &[String],
        disasters: &[String],
    ) -> PacketResult<Self> {
        let mut header = Header::new(PacketType::ReportRequest, packet_id);
        header.timestamp = unix_now();
        header.area_code = area_code;
        header.flags.weather = weather_code.is_some();
        header.flags.temperature = temperature_c.is_some();
        header.flags.pop = pop.is_some();
        header.flags.alert = !alerts.is_empty();
        header.flags.disaster = !disasters.is_empty();

        let mut frame = Frame::new(header);
        frame.payload = Some(DataPayload {
            weather_code: weather_code.unwrap_or(0),
            temperature: match temperature_c {
                Some(celsius) => encode_temperature(celsius)?,
                None => 0,
            },
            pop: pop.unwrap_or(0),
        });
        for alert in alerts {
            frame.ext.add_alert(alert)?;
        }
        for disaster in disasters {
            frame.ext.add_disaster(disaster)?;
        }
        Ok(Self { frame })
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::ReportRequest {
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

/// The acknowledgement: same packet id, same area code. Carries the
/// request's source record so the proxy can route it home.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportAck {
    frame: Frame,
}

impl ReportAck {
    pub fn for_request(request: &Frame) -> PacketResult<Self> {
        let mut header = Header::new(PacketType::ReportAck, request.header.packet_id);
        header.version = request.header.version;
        header.timestamp = unix_now();
        header.area_code = request.header.area_code;
        let mut frame = Frame::new(header);
        if let Some(source) = request.ext.source() {
            frame.ext.set_source(source)?;
        }
        Ok(Self { frame })
    }

    pub fn from_frame(frame: Frame) -> PacketResult<Self> {
        if frame.header.packet_type != PacketType::ReportAck {
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

    pub fn packet_id(&self) -> u16 {
        self.frame.header.packet_id
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

    #[test]
    fn report_round_trip_with_bias() {
        let req = ReportRequest::new(501, 130_000, Some(200), Some(25), Some(60), &[], &[]).unwrap();
        let wire = req.encode().unwrap();
        let decoded = ReportRequest::decode(&wire).unwrap();
        assert_eq!(decoded.weather_code(), Some(200));
        assert_eq!(decoded.temperature_c(), Some(25));
        assert_eq!(decoded.pop(), Some(60));
        // wire byte is biased
        assert_eq!(decoded.frame().payload.unwrap().temperature, 125);
    }

    #[test]
    fn absent_fields_stay_absent() {
        let req = ReportRequest::new(1, 11_000, None, Some(-5), None, &[], &[]).unwrap();
        let decoded = ReportRequest::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded.weather_code(), None);
        assert_eq!(decoded.temperature_c(), Some(-5));
        assert_eq!(decoded.pop(), None);
    }

    #[test]
    fn report_carries_alert_lists() {
        let alerts = vec!["竜巻注意情報".to_string()];
        let req = ReportRequest::new(2, 11_000, None, None, None, &alerts, &[]).unwrap();
        let decoded = ReportRequest::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded.alerts(), alerts);
        assert!(decoded.frame().header.flags.alert);
    }

    #[test]
    fn ack_echoes_id_area_and_source() {
        let mut req = ReportRequest::new(900, 16_000, Some(100), None, None, &[], &[]).unwrap();
        req.frame_mut()
            .ext
            .set_source("192.0.2.9:33333".parse().unwrap())
            .unwrap();
        let ack = ReportAck::for_request(req.frame()).unwrap();
        let decoded = ReportAck::decode(&ack.encode().unwrap()).unwrap();
        assert_eq!(decoded.packet_id(), 900);
        assert_eq!(decoded.area_code(), 16_000);
        assert_eq!(
            decoded.frame().ext.source().unwrap(),
            "192.0.2.9:33333".parse().unwrap()
        );
    }
}
