use std::time::SystemTime;

use anyhow::{anyhow, bail};
use bytes::{BufMut, Bytes, BytesMut};
use crc::Crc;

use crate::cd11::frame::{Cd11Frame, Cd11Payload, FrameHeader, FrameTrailer, MalformedFrame, FRAME_HEADER_LEN, FRAME_TRAILER_MIN_LEN};
use crate::cd11::frame_type::FrameType;
use crate::util::buf_ext::{BufExt, BufMutExt};

/// Conversion between typed frames and their CD1.1 wire representation. Decoding never fails
///  with an error: bytes that do not form a valid frame are returned as a [MalformedFrame].
pub trait FrameCodec: Send + Sync + 'static {
    fn encode(&self, frame: &Cd11Frame) -> anyhow::Result<Bytes>;

    fn decode(&self, raw: Bytes, reception_time: SystemTime) -> Result<Cd11Frame, MalformedFrame>;
}

pub struct Cd11Codec {
    crc: Crc<u64>,
}

impl Default for Cd11Codec {
    fn default() -> Self {
        Cd11Codec::new()
    }
}

impl Cd11Codec {
    pub fn new() -> Cd11Codec {
        Cd11Codec {
            crc: Crc::<u64>::new(&crc::CRC_64_ECMA_182),
        }
    }

    /// CRC over the entire frame with the trailing communication verification field zeroed
    fn comm_verification(&self, frame_without_verification: &[u8]) -> u64 {
        let mut digest = self.crc.digest();
        digest.update(frame_without_verification);
        digest.update(&[0u8; 8]);
        digest.finalize()
    }

    fn try_decode(&self, raw: &[u8], station: &mut Option<String>) -> anyhow::Result<Cd11Frame> {
        if raw.len() < FRAME_HEADER_LEN + FRAME_TRAILER_MIN_LEN {
            bail!("frame too short: {} bytes", raw.len());
        }

        let mut buf = raw;
        let raw_frame_type = buf.try_get_u32_be()?;
        let trailer_offset = buf.try_get_u32_be()? as usize;
        let frame_creator = buf.try_get_fixed_string(8)?;
        if !frame_creator.is_empty() {
            *station = Some(frame_creator.clone());
        }
        let frame_destination = buf.try_get_fixed_string(8)?;
        let sequence_number = buf.try_get_u64_be()?;
        let series = buf.try_get_u32_be()?;

        if trailer_offset < FRAME_HEADER_LEN || trailer_offset + FRAME_TRAILER_MIN_LEN > raw.len() {
            bail!("invalid trailer offset {} for a frame of {} bytes", trailer_offset, raw.len());
        }

        let verification_offset = raw.len() - 8;
        let mut verification_buf = &raw[verification_offset..];
        let comm_verification = verification_buf.try_get_u64_be()?;
        let expected = self.comm_verification(&raw[..verification_offset]);
        if comm_verification != expected {
            bail!("communication verification mismatch: expected {:016x}, was {:016x}", expected, comm_verification);
        }

        let frame_type = FrameType::try_from(raw_frame_type)
            .map_err(|_| anyhow!("unsupported frame type {}", raw_frame_type))?;

        let mut payload_buf = &raw[FRAME_HEADER_LEN..trailer_offset];
        let payload = Cd11Payload::deser(frame_type, &mut payload_buf)?;

        let mut trailer_buf = &raw[trailer_offset..verification_offset];
        let auth_key_identifier = trailer_buf.try_get_u32_be()?;
        let auth_size = trailer_buf.try_get_u32_be()? as usize;
        let auth_value = trailer_buf.try_get_padded_bytes(auth_size)?;
        if !trailer_buf.is_empty() {
            bail!("{} unexpected bytes in frame trailer", trailer_buf.len());
        }

        Ok(Cd11Frame {
            header: FrameHeader {
                frame_creator,
                frame_destination,
                sequence_number,
                series,
            },
            payload,
            trailer: FrameTrailer {
                auth_key_identifier,
                auth_value,
            },
        })
    }
}

impl FrameCodec for Cd11Codec {
    fn encode(&self, frame: &Cd11Frame) -> anyhow::Result<Bytes> {
        let mut payload = BytesMut::new();
        frame.payload.ser(&mut payload)?;
        let trailer_offset = FRAME_HEADER_LEN + payload.len();

        let mut buf = BytesMut::with_capacity(trailer_offset + FRAME_TRAILER_MIN_LEN + frame.trailer.auth_value.len() + 3);
        buf.put_u32(frame.frame_type().into());
        buf.put_u32(u32::try_from(trailer_offset)?);
        buf.put_fixed_string(&frame.header.frame_creator, 8)?;
        buf.put_fixed_string(&frame.header.frame_destination, 8)?;
        buf.put_u64(frame.header.sequence_number);
        buf.put_u32(frame.header.series);
        buf.put_slice(&payload);

        buf.put_u32(frame.trailer.auth_key_identifier);
        buf.put_u32(u32::try_from(frame.trailer.auth_value.len())?);
        buf.put_padded_bytes(&frame.trailer.auth_value);

        let comm_verification = self.comm_verification(&buf);
        buf.put_u64(comm_verification);
        Ok(buf.freeze())
    }

    fn decode(&self, raw: Bytes, reception_time: SystemTime) -> Result<Cd11Frame, MalformedFrame> {
        let mut station = None;
        match self.try_decode(&raw, &mut station) {
            Ok(frame) => Ok(frame),
            Err(e) => Err(MalformedFrame {
                station,
                cause: format!("{:#}", e),
                raw,
                reception_time,
            }),
        }
    }
}
