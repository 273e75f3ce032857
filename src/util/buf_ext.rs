//! Fixed-width, NUL-padded and 4-byte-aligned field access for CD1.1 buffers. All integers on the
//!  wire are big-endian.

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

/// CD1.1 variable-length fields are padded with zero bytes to a multiple of four
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> anyhow::Result<$ty> {
            if self.remaining() < std::mem::size_of::<$ty>() {
                bail!("buffer underflow reading {}", stringify!($ty));
            }
            Ok(self.$getter())
        }
    }
}

pub trait BufExt: Buf {
    get_try_impl!(try_get_u8, u8, get_u8);
    get_try_impl!(try_get_u16_be, u16, get_u16);
    get_try_impl!(try_get_u32_be, u32, get_u32);
    get_try_impl!(try_get_u64_be, u64, get_u64);
    get_try_impl!(try_get_f32_be, f32, get_f32);

    fn try_get_bytes_exact(&mut self, len: usize) -> anyhow::Result<Bytes> {
        if self.remaining() < len {
            bail!("buffer underflow: expected {} bytes, {} remaining", len, self.remaining());
        }
        Ok(self.copy_to_bytes(len))
    }

    /// reads a fixed-width text field, stripping the NUL padding
    fn try_get_fixed_string(&mut self, len: usize) -> anyhow::Result<String> {
        let raw = self.try_get_bytes_exact(len)?;
        let s = std::str::from_utf8(&raw)?;
        Ok(s.trim_end_matches('\0').to_string())
    }

    fn try_get_padded_bytes(&mut self, len: usize) -> anyhow::Result<Bytes> {
        let result = self.try_get_bytes_exact(len)?;
        let padding = padded_len(len) - len;
        if self.remaining() < padding {
            bail!("buffer underflow in padding");
        }
        self.advance(padding);
        Ok(result)
    }

    /// u32 length prefix followed by the padded text
    fn try_get_sized_string(&mut self) -> anyhow::Result<String> {
        let len = self.try_get_u32_be()? as usize;
        let raw = self.try_get_padded_bytes(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }
}

pub trait BufMutExt: BufMut {
    fn put_fixed_string(&mut self, s: &str, len: usize) -> anyhow::Result<()> {
        if s.len() > len {
            bail!("'{}' does not fit into a field of {} bytes", s, len);
        }
        self.put_slice(s.as_bytes());
        self.put_bytes(0, len - s.len());
        Ok(())
    }

    fn put_padded_bytes(&mut self, data: &[u8]) {
        self.put_slice(data);
        self.put_bytes(0, padded_len(data.len()) - data.len());
    }

    fn put_sized_string(&mut self, s: &str) -> anyhow::Result<()> {
        self.put_u32(u32::try_from(s.len())?);
        self.put_padded_bytes(s.as_bytes());
        Ok(())
    }
}

impl <T: Buf> BufExt for T {
}

impl <T: BufMut> BufMutExt for T {
}
