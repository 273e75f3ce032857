use anyhow::bail;
use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

use crate::cd11::channel_subframe::ChannelSubframe;
use crate::cd11::timestamp::{format_cd11_time, parse_cd11_time, TIMESTAMP_LEN};
use crate::util::buf_ext::{BufExt, BufMutExt};

/// Length of a single channel's entry in the channel string: site (5), channel (3), location (2)
pub const CHANNEL_NAME_LEN: usize = 10;

/// DATA payload: the data frame header followed by one subframe per channel
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub frame_time_length_millis: u32,
    pub nominal_time: DateTime<Utc>,
    pub channel_string: String,
    pub channel_subframes: Vec<ChannelSubframe>,
}

impl DataFrame {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_u32(u32::try_from(self.channel_subframes.len())?);
        buf.put_u32(self.frame_time_length_millis);
        buf.put_fixed_string(&format_cd11_time(self.nominal_time), TIMESTAMP_LEN)?;
        buf.put_sized_string(&self.channel_string)?;
        for subframe in &self.channel_subframes {
            subframe.ser(buf)?;
        }
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<DataFrame> {
        let channel_count = buf.try_get_u32_be()?;
        let frame_time_length_millis = buf.try_get_u32_be()?;
        let nominal_time = parse_cd11_time(&buf.try_get_fixed_string(TIMESTAMP_LEN)?)?;
        let channel_string = buf.try_get_sized_string()?;

        let mut channel_subframes = Vec::new();
        for i in 0..channel_count {
            match ChannelSubframe::try_deser(buf) {
                Ok(subframe) => channel_subframes.push(subframe),
                Err(e) => bail!("channel subframe {} of {}: {:#}", i + 1, channel_count, e),
            }
        }

        Ok(DataFrame {
            frame_time_length_millis,
            nominal_time,
            channel_string,
            channel_subframes,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channel_subframes.len()
    }

    /// The channel string is a concatenation of fixed-width channel names, some senders pad the
    ///  name fields with blanks instead of NUL
    pub fn channel_names(&self) -> Vec<String> {
        self.channel_string.as_bytes()
            .chunks(CHANNEL_NAME_LEN)
            .map(|chunk| String::from_utf8_lossy(chunk)
                .trim_matches(|c| c == '\0' || c == ' ')
                .to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// The time span covered by the frame's samples: from the earliest subframe time stamp to the
    ///  latest subframe end time. A frame without subframes covers its nominal time span.
    pub fn payload_time_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.channel_subframes.iter()
            .map(|s| s.time_stamp)
            .min();
        let end = self.channel_subframes.iter()
            .map(|s| s.end_time())
            .max();

        match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => (self.nominal_time, self.nominal_time + chrono::TimeDelta::milliseconds(self.frame_time_length_millis.into())),
        }
    }
}
