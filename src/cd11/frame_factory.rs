use std::net::Ipv4Addr;

use crate::cd11::acknack::Acknack;
use crate::cd11::alert::Alert;
use crate::cd11::connection_exchange::{ConnectionExchange, PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION};
use crate::cd11::frame::{Cd11Frame, Cd11Payload, FrameHeader};
use crate::cd11::option_exchange::OptionExchange;
use crate::gaps::gap_list::GapList;

/// the frame set announced in ACKNACKs until the peer's frame set is known
pub const DEFAULT_FRAME_SET: &str = "0:0";

/// Wraps outgoing payloads into frames, stamping our own name as the creator and an increasing
///  sequence number
pub struct FrameFactory {
    frame_creator: String,
    frame_destination: String,
    next_sequence_number: u64,
}

impl FrameFactory {
    pub fn new(frame_creator: &str, frame_destination: &str) -> FrameFactory {
        FrameFactory {
            frame_creator: frame_creator.to_string(),
            frame_destination: frame_destination.to_string(),
            next_sequence_number: 0,
        }
    }

    pub fn wrap(&mut self, payload: Cd11Payload) -> Cd11Frame {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;

        Cd11Frame {
            header: FrameHeader {
                frame_creator: self.frame_creator.clone(),
                frame_destination: self.frame_destination.clone(),
                sequence_number,
                series: 0,
            },
            payload,
            trailer: Default::default(),
        }
    }

    /// Tells a station where to connect for data transfer. There is no secondary address.
    pub fn connection_response(&mut self, responder_type: &str, service_type: &str, data_address: Ipv4Addr, data_port: u16) -> Cd11Frame {
        let name = self.frame_creator.clone();
        self.wrap(Cd11Payload::ConnectionResponse(ConnectionExchange {
            major_version: PROTOCOL_MAJOR_VERSION,
            minor_version: PROTOCOL_MINOR_VERSION,
            name,
            name_type: responder_type.to_string(),
            service_type: service_type.to_string(),
            primary_address: data_address,
            primary_port: data_port,
            secondary_address: Ipv4Addr::UNSPECIFIED,
            secondary_port: 0,
        }))
    }

    /// mirrors the requested options
    pub fn option_response(&mut self, request: &OptionExchange) -> Cd11Frame {
        self.wrap(Cd11Payload::OptionResponse(request.clone()))
    }

    /// Reports the received range as the lowest and highest sequence numbers that actually
    ///  arrived, plus the gaps in between
    pub fn acknack(&mut self, frame_set: &str, gap_list: &GapList) -> Cd11Frame {
        self.wrap(Cd11Payload::Acknack(Acknack {
            frame_set_acked: frame_set.to_string(),
            lowest_seq_num: gap_list.lowest_received(),
            highest_seq_num: gap_list.highest_received(),
            gaps: gap_list.gap_ranges(),
        }))
    }

    pub fn alert(&mut self, message: &str) -> Cd11Frame {
        self.wrap(Cd11Payload::Alert(Alert {
            message: message.to_string(),
        }))
    }
}
