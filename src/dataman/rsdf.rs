use std::time::SystemTime;

use anyhow::bail;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::cd11::channel_subframe::ChannelSubframe;
use crate::cd11::frame::{Cd11Frame, Cd11Payload};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PayloadFormat {
    Cd11,
    Cd1Encapsulation,
}

/// A received data frame as handed downstream, stamped with the wall-clock reception time
#[derive(Debug, Clone, PartialEq)]
pub struct RawStationDataFrame {
    pub station_name: String,
    pub payload_format: PayloadFormat,
    pub reception_time: SystemTime,
    /// first and last sample time over all channels; not known for CD-1 encapsulated payloads
    pub payload_start_time: Option<DateTime<Utc>>,
    pub payload_end_time: Option<DateTime<Utc>>,
    pub nominal_time: Option<DateTime<Utc>>,
    pub frame_time_length_millis: Option<u32>,
    pub channel_names: Vec<String>,
    pub channel_subframes: Vec<ChannelSubframe>,
    /// the frame's payload as it was on the wire
    pub raw_payload: Bytes,
}

impl RawStationDataFrame {
    pub fn from_frame(station_name: &str, frame: &Cd11Frame, reception_time: SystemTime) -> anyhow::Result<RawStationDataFrame> {
        match &frame.payload {
            Cd11Payload::Data(data) => {
                let mut raw_payload = BytesMut::new();
                data.ser(&mut raw_payload)?;
                let (start, end) = data.payload_time_range();

                Ok(RawStationDataFrame {
                    station_name: station_name.to_string(),
                    payload_format: PayloadFormat::Cd11,
                    reception_time,
                    payload_start_time: Some(start),
                    payload_end_time: Some(end),
                    nominal_time: Some(data.nominal_time),
                    frame_time_length_millis: Some(data.frame_time_length_millis),
                    channel_names: data.channel_names(),
                    channel_subframes: data.channel_subframes.clone(),
                    raw_payload: raw_payload.freeze(),
                })
            }
            Cd11Payload::CdOneEncapsulation(raw) => Ok(RawStationDataFrame {
                station_name: station_name.to_string(),
                payload_format: PayloadFormat::Cd1Encapsulation,
                reception_time,
                payload_start_time: None,
                payload_end_time: None,
                nominal_time: None,
                frame_time_length_millis: None,
                channel_names: Vec::new(),
                channel_subframes: Vec::new(),
                raw_payload: raw.clone(),
            }),
            _ => bail!("{:?} frame does not carry station data", frame.frame_type()),
        }
    }
}

/// a data frame together with the sequence number of the frame it arrived in
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedRsdf {
    pub rsdf: RawStationDataFrame,
    pub sequence_number: u64,
}
