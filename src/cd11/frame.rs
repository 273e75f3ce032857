use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use bytes::{Buf, BufMut, Bytes};

use crate::cd11::acknack::Acknack;
use crate::cd11::alert::Alert;
use crate::cd11::command_response::CommandResponse;
use crate::cd11::connection_exchange::ConnectionExchange;
use crate::cd11::data_frame::DataFrame;
use crate::cd11::frame_type::FrameType;
use crate::cd11::option_exchange::OptionExchange;

pub const FRAME_HEADER_LEN: usize = 36;
/// authentication key id, authentication size and communication verification
pub const FRAME_TRAILER_MIN_LEN: usize = 16;

/// The header fields that are not derived from the payload. Frame type and trailer offset are
///  computed during encoding.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub frame_creator: String,
    pub frame_destination: String,
    pub sequence_number: u64,
    pub series: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct FrameTrailer {
    pub auth_key_identifier: u32,
    pub auth_value: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cd11Payload {
    ConnectionRequest(ConnectionExchange),
    ConnectionResponse(ConnectionExchange),
    OptionRequest(OptionExchange),
    OptionResponse(OptionExchange),
    Data(DataFrame),
    Acknack(Acknack),
    Alert(Alert),
    CommandResponse(CommandResponse),
    CdOneEncapsulation(Bytes),
    Reset(Bytes),
}

impl Cd11Payload {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Cd11Payload::ConnectionRequest(_) => FrameType::ConnectionRequest,
            Cd11Payload::ConnectionResponse(_) => FrameType::ConnectionResponse,
            Cd11Payload::OptionRequest(_) => FrameType::OptionRequest,
            Cd11Payload::OptionResponse(_) => FrameType::OptionResponse,
            Cd11Payload::Data(_) => FrameType::Data,
            Cd11Payload::Acknack(_) => FrameType::Acknack,
            Cd11Payload::Alert(_) => FrameType::Alert,
            Cd11Payload::CommandResponse(_) => FrameType::CommandResponse,
            Cd11Payload::CdOneEncapsulation(_) => FrameType::CdOneEncapsulation,
            Cd11Payload::Reset(_) => FrameType::Reset,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        match self {
            Cd11Payload::ConnectionRequest(p) => p.ser(buf),
            Cd11Payload::ConnectionResponse(p) => p.ser(buf),
            Cd11Payload::OptionRequest(p) => p.ser(buf),
            Cd11Payload::OptionResponse(p) => p.ser(buf),
            Cd11Payload::Data(p) => p.ser(buf),
            Cd11Payload::Acknack(p) => p.ser(buf),
            Cd11Payload::Alert(p) => p.ser(buf),
            Cd11Payload::CommandResponse(p) => p.ser(buf),
            Cd11Payload::CdOneEncapsulation(raw) | Cd11Payload::Reset(raw) => {
                buf.put_slice(raw);
                Ok(())
            }
        }
    }

    pub fn deser(frame_type: FrameType, buf: &mut impl Buf) -> anyhow::Result<Cd11Payload> {
        let rest = buf.remaining();
        let payload = match frame_type {
            FrameType::ConnectionRequest => Cd11Payload::ConnectionRequest(ConnectionExchange::deser(buf)?),
            FrameType::ConnectionResponse => Cd11Payload::ConnectionResponse(ConnectionExchange::deser(buf)?),
            FrameType::OptionRequest => Cd11Payload::OptionRequest(OptionExchange::deser(buf)?),
            FrameType::OptionResponse => Cd11Payload::OptionResponse(OptionExchange::deser(buf)?),
            FrameType::Data => Cd11Payload::Data(DataFrame::deser(buf)?),
            FrameType::Acknack => Cd11Payload::Acknack(Acknack::deser(buf)?),
            FrameType::Alert => Cd11Payload::Alert(Alert::deser(buf)?),
            FrameType::CommandResponse => Cd11Payload::CommandResponse(CommandResponse::deser(buf)?),
            FrameType::CdOneEncapsulation => Cd11Payload::CdOneEncapsulation(buf.copy_to_bytes(rest)),
            FrameType::Reset => Cd11Payload::Reset(buf.copy_to_bytes(rest)),
        };
        Ok(payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cd11Frame {
    pub header: FrameHeader,
    pub payload: Cd11Payload,
    pub trailer: FrameTrailer,
}

impl Cd11Frame {
    pub fn frame_type(&self) -> FrameType {
        self.payload.frame_type()
    }

    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    pub fn creator(&self) -> &str {
        &self.header.frame_creator
    }
}

/// Bytes that were framed correctly on the wire but could not be decoded into a [Cd11Frame].
#[derive(Debug, Clone)]
pub struct MalformedFrame {
    /// best effort, taken from the frame header if it could be read
    pub station: Option<String>,
    pub cause: String,
    pub raw: Bytes,
    pub reception_time: SystemTime,
}

impl Display for MalformedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed frame ({} bytes) from {}: {}",
               self.raw.len(),
               self.station.as_deref().unwrap_or("<unknown>"),
               self.cause)
    }
}
