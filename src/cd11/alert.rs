use bytes::{Buf, BufMut};

use crate::util::buf_ext::{BufExt, BufMutExt};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Alert {
    pub message: String,
}

impl Alert {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_sized_string(&self.message)
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Alert> {
        Ok(Alert {
            message: buf.try_get_sized_string()?,
        })
    }
}
