use std::io::ErrorKind;

use anyhow::bail;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cd11::frame::{FRAME_HEADER_LEN, FRAME_TRAILER_MIN_LEN};
use crate::util::buf_ext::padded_len;

fn be_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Reads the bytes of one frame, using the trailer offset and the authentication size to determine
///  its length. Returns `None` if the stream ends at a frame boundary.
///
/// The content is not validated beyond what is needed to find the frame's end: that is the codec's
///  job. Errors here mean the stream cannot be resynchronized, and the connection should be closed.
pub async fn read_raw_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_len: usize) -> anyhow::Result<Option<Bytes>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let num_read = reader.read(&mut header).await?;
    if num_read == 0 {
        return Ok(None);
    }
    if let Err(e) = reader.read_exact(&mut header[num_read..]).await {
        if e.kind() == ErrorKind::UnexpectedEof {
            bail!("connection closed inside a frame header");
        }
        return Err(e.into());
    }

    let trailer_offset = be_u32(&header, 4) as usize;
    if trailer_offset < FRAME_HEADER_LEN || trailer_offset + FRAME_TRAILER_MIN_LEN > max_frame_len {
        bail!("invalid trailer offset {}", trailer_offset);
    }

    // payload plus the fixed part of the trailer that precedes the authentication value
    let mut buf = BytesMut::zeroed(trailer_offset + 8);
    buf[..FRAME_HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut buf[FRAME_HEADER_LEN..]).await?;

    let auth_size = be_u32(&buf, trailer_offset + 4) as usize;
    let remaining = padded_len(auth_size) + 8;
    if buf.len() + remaining > max_frame_len {
        bail!("frame exceeds the maximum size of {} bytes", max_frame_len);
    }

    let start = buf.len();
    buf.resize(start + remaining, 0);
    reader.read_exact(&mut buf[start..]).await?;

    Ok(Some(buf.freeze()))
}
