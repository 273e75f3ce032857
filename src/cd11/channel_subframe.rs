use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};
use chrono::{DateTime, TimeDelta, Utc};

use crate::cd11::timestamp::{format_cd11_time, parse_cd11_time, TIMESTAMP_LEN};
use crate::util::buf_ext::{padded_len, BufExt, BufMutExt};

/// the channel description block: four flag bytes, the names, the data format and the calibration
const CHANNEL_DESCRIPTION_LEN: usize = 24;

/// a subframe without status, data and authenticator
pub const MIN_SUBFRAME_LEN: usize = 9 * 4 + CHANNEL_DESCRIPTION_LEN + TIMESTAMP_LEN;

/// One channel's block in a DATA frame. Status and data are kept as they are on the wire; their
///  interpretation depends on `data_format` and `transformation`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSubframe {
    /// length of the subframe, not counting this field
    pub channel_length: u32,
    pub auth_offset: u32,
    pub authenticated: bool,
    /// compression applied to the channel data, 0 for none
    pub transformation: u8,
    pub sensor_type: u8,
    pub calibration: bool,
    pub site_name: String,
    pub channel_name: String,
    pub location_name: String,
    /// CSS 3.0 data type, e.g. `s4`
    pub data_format: String,
    pub calibration_factor: f32,
    pub calibration_period: f32,
    /// time of the first sample
    pub time_stamp: DateTime<Utc>,
    pub subframe_time_length_millis: u32,
    pub samples: u32,
    pub channel_status: Bytes,
    pub channel_data: Bytes,
    pub subframe_count: u32,
    pub auth_key_identifier: u32,
    pub authenticator: Bytes,
}

impl ChannelSubframe {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_u32(self.channel_length);
        buf.put_u32(self.auth_offset);
        buf.put_u8(self.authenticated.into());
        buf.put_u8(self.transformation);
        buf.put_u8(self.sensor_type);
        buf.put_u8(self.calibration.into());
        buf.put_fixed_string(&self.site_name, 5)?;
        buf.put_fixed_string(&self.channel_name, 3)?;
        buf.put_fixed_string(&self.location_name, 2)?;
        buf.put_fixed_string(&self.data_format, 2)?;
        buf.put_f32(self.calibration_factor);
        buf.put_f32(self.calibration_period);
        buf.put_fixed_string(&format_cd11_time(self.time_stamp), TIMESTAMP_LEN)?;
        buf.put_u32(self.subframe_time_length_millis);
        buf.put_u32(self.samples);
        buf.put_u32(u32::try_from(self.channel_status.len())?);
        buf.put_padded_bytes(&self.channel_status);
        buf.put_u32(u32::try_from(self.channel_data.len())?);
        buf.put_padded_bytes(&self.channel_data);
        buf.put_u32(self.subframe_count);
        buf.put_u32(self.auth_key_identifier);
        buf.put_u32(u32::try_from(self.authenticator.len())?);
        buf.put_padded_bytes(&self.authenticator);
        Ok(())
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<ChannelSubframe> {
        if buf.remaining() < MIN_SUBFRAME_LEN {
            bail!("channel subframe needs at least {} bytes, {} remaining", MIN_SUBFRAME_LEN, buf.remaining());
        }

        let channel_length = buf.try_get_u32_be()?;
        let auth_offset = buf.try_get_u32_be()?;
        let authenticated = buf.try_get_u8()? == 1;
        let transformation = buf.try_get_u8()?;
        let sensor_type = buf.try_get_u8()?;
        let calibration = buf.try_get_u8()? == 1;
        let site_name = try_get_name(buf, 5)?;
        let channel_name = try_get_name(buf, 3)?;
        let location_name = try_get_name(buf, 2)?;
        let data_format = try_get_name(buf, 2)?;
        let calibration_factor = buf.try_get_f32_be()?;
        let calibration_period = buf.try_get_f32_be()?;
        let time_stamp = parse_cd11_time(&buf.try_get_fixed_string(TIMESTAMP_LEN)?)?;
        let subframe_time_length_millis = buf.try_get_u32_be()?;
        let samples = buf.try_get_u32_be()?;

        let status_size = buf.try_get_u32_be()? as usize;
        let channel_status = buf.try_get_padded_bytes(status_size)?;
        let data_size = buf.try_get_u32_be()? as usize;
        let channel_data = buf.try_get_padded_bytes(data_size)?;

        let subframe_count = buf.try_get_u32_be()?;
        let auth_key_identifier = buf.try_get_u32_be()?;
        let auth_size = buf.try_get_u32_be()? as usize;
        let authenticator = buf.try_get_padded_bytes(auth_size)?;

        let subframe = ChannelSubframe {
            channel_length,
            auth_offset,
            authenticated,
            transformation,
            sensor_type,
            calibration,
            site_name,
            channel_name,
            location_name,
            data_format,
            calibration_factor,
            calibration_period,
            time_stamp,
            subframe_time_length_millis,
            samples,
            channel_status,
            channel_data,
            subframe_count,
            auth_key_identifier,
            authenticator,
        };
        subframe.validate()?;
        Ok(subframe)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let channel_length = self.channel_length as usize;
        if channel_length % 4 != 0 {
            bail!("channel length {} is not a multiple of 4", channel_length);
        }
        if channel_length + 4 < MIN_SUBFRAME_LEN {
            bail!("channel length {} is below the minimum subframe length", channel_length);
        }
        if self.auth_offset as usize + 4 > channel_length {
            bail!("authentication offset {} exceeds channel length {}", self.auth_offset, channel_length);
        }
        if self.site_name.is_empty() || self.channel_name.is_empty() {
            bail!("channel subframe without site or channel name");
        }
        Ok(())
    }

    /// the value of `channel_length` that matches this subframe's content
    pub fn encoded_channel_length(&self) -> usize {
        MIN_SUBFRAME_LEN - 4
            + padded_len(self.channel_status.len())
            + padded_len(self.channel_data.len())
            + padded_len(self.authenticator.len())
    }

    /// site, channel and location as in a DATA frame's channel string
    pub fn channel_string(&self) -> String {
        format!("{:<5}{:<3}{:<2}", self.site_name, self.channel_name, self.location_name)
    }

    /// The time of the last sample, i.e. one sample period before the end of the subframe's time
    ///  span. A subframe without samples ends where it starts.
    pub fn end_time(&self) -> DateTime<Utc> {
        if self.samples == 0 {
            return self.time_stamp;
        }
        let length_nanos = i64::from(self.subframe_time_length_millis) * 1_000_000;
        let sample_period_nanos = length_nanos / i64::from(self.samples);
        self.time_stamp + TimeDelta::nanoseconds(length_nanos - sample_period_nanos)
    }
}

/// names are padded with NUL or blanks
fn try_get_name(buf: &mut impl Buf, len: usize) -> anyhow::Result<String> {
    let raw = buf.try_get_fixed_string(len)?;
    Ok(raw.trim_end_matches(|c| c == '\0' || c == ' ').to_string())
}
