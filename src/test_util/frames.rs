//! Builders for frames as a station would send them

use std::net::Ipv4Addr;
use std::time::SystemTime;

use bytes::Bytes;

use crate::cd11::acknack::Acknack;
use crate::cd11::alert::Alert;
use crate::cd11::command_response::CommandResponse;
use crate::cd11::connection_exchange::{ConnectionExchange, PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION};
use crate::cd11::channel_subframe::ChannelSubframe;
use crate::cd11::data_frame::DataFrame;
use crate::cd11::frame::{Cd11Frame, Cd11Payload, FrameHeader, MalformedFrame};
use crate::cd11::option_exchange::{Cd11Option, OptionExchange};
use crate::cd11::timestamp::parse_cd11_time;

pub const TEST_STATION: &str = "H04N";

pub fn station_frame(station: &str, sequence_number: u64, payload: Cd11Payload) -> Cd11Frame {
    Cd11Frame {
        header: FrameHeader {
            frame_creator: station.to_string(),
            frame_destination: "IDC".to_string(),
            sequence_number,
            series: 0,
        },
        payload,
        trailer: Default::default(),
    }
}

pub fn connection_request_frame(station: &str) -> Cd11Frame {
    station_frame(station, 0, Cd11Payload::ConnectionRequest(ConnectionExchange {
        major_version: PROTOCOL_MAJOR_VERSION,
        minor_version: PROTOCOL_MINOR_VERSION,
        name: station.to_string(),
        name_type: "IMS".to_string(),
        service_type: "TCP".to_string(),
        primary_address: Ipv4Addr::LOCALHOST,
        primary_port: 0,
        secondary_address: Ipv4Addr::UNSPECIFIED,
        secondary_port: 0,
    }))
}

/// 10 seconds of 40 Hz samples for one channel of the test station
pub fn channel_subframe(channel_name: &str, time_stamp: &str) -> ChannelSubframe {
    let mut subframe = ChannelSubframe {
        channel_length: 0,
        auth_offset: 0,
        authenticated: false,
        transformation: 0,
        sensor_type: 0,
        calibration: false,
        site_name: TEST_STATION.to_string(),
        channel_name: channel_name.to_string(),
        location_name: "00".to_string(),
        data_format: "s4".to_string(),
        calibration_factor: 1.5,
        calibration_period: 1.0,
        time_stamp: parse_cd11_time(time_stamp).unwrap(),
        subframe_time_length_millis: 10_000,
        samples: 400,
        channel_status: Bytes::from_static(&[1, 0, 0, 0, 0, 0]),
        channel_data: Bytes::from(vec![7u8; 1600]),
        subframe_count: 0,
        auth_key_identifier: 0,
        authenticator: Bytes::new(),
    };
    subframe.channel_length = subframe.encoded_channel_length() as u32;
    subframe.auth_offset = subframe.channel_length - 12;
    subframe
}

pub fn multi_channel_data(channel_names: &[&str]) -> DataFrame {
    let channel_subframes = channel_names.iter()
        .map(|name| channel_subframe(name, "2019001 00:00:00.000"))
        .collect::<Vec<_>>();
    let channel_string = channel_subframes.iter()
        .map(|s| s.channel_string())
        .collect::<String>();

    DataFrame {
        frame_time_length_millis: 10_000,
        nominal_time: parse_cd11_time("2019001 00:00:00.000").unwrap(),
        channel_string,
        channel_subframes,
    }
}

pub fn data_frame(sequence_number: u64) -> Cd11Frame {
    station_frame(TEST_STATION, sequence_number, Cd11Payload::Data(multi_channel_data(&["BHZ"])))
}

pub fn acknack_frame(sequence_number: u64, frame_set: &str, highest_seq_num: u64) -> Cd11Frame {
    station_frame(TEST_STATION, sequence_number, Cd11Payload::Acknack(Acknack {
        frame_set_acked: frame_set.to_string(),
        lowest_seq_num: 0,
        highest_seq_num,
        gaps: vec![],
    }))
}

pub fn option_request_frame(sequence_number: u64) -> Cd11Frame {
    station_frame(TEST_STATION, sequence_number, Cd11Payload::OptionRequest(OptionExchange {
        options: vec![Cd11Option {
            option_type: 1,
            value: Bytes::from_static(TEST_STATION.as_bytes()),
        }],
    }))
}

pub fn command_response_frame(sequence_number: u64) -> Cd11Frame {
    station_frame(TEST_STATION, sequence_number, Cd11Payload::CommandResponse(CommandResponse {
        responder_station: TEST_STATION.to_string(),
        command_timestamp: "2019001 00:00:00.000".to_string(),
        command_request: "status".to_string(),
        command_response: "ok".to_string(),
    }))
}

pub fn alert_frame(sequence_number: u64) -> Cd11Frame {
    station_frame(TEST_STATION, sequence_number, Cd11Payload::Alert(Alert {
        message: "going down".to_string(),
    }))
}

pub fn reset_frame(sequence_number: u64) -> Cd11Frame {
    station_frame(TEST_STATION, sequence_number, Cd11Payload::Reset(Bytes::from_static(b"RESET")))
}

pub fn malformed_frame(station: Option<&str>) -> MalformedFrame {
    MalformedFrame {
        station: station.map(|s| s.to_string()),
        cause: "checksum mismatch".to_string(),
        raw: Bytes::from_static(&[0, 0, 0, 5, 0, 0]),
        reception_time: SystemTime::now(),
    }
}
