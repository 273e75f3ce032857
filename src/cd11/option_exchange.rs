use bytes::{Buf, BufMut, Bytes};

use crate::util::buf_ext::{BufExt, BufMutExt};

/// A single CD1.1 option, e.g. type 1 carries the station name during option negotiation
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Cd11Option {
    pub option_type: u32,
    pub value: Bytes,
}

/// Payload of OPTION_REQUEST and OPTION_RESPONSE
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct OptionExchange {
    pub options: Vec<Cd11Option>,
}

impl OptionExchange {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_u32(u32::try_from(self.options.len())?);
        for option in &self.options {
            buf.put_u32(option.option_type);
            buf.put_u32(u32::try_from(option.value.len())?);
            buf.put_padded_bytes(&option.value);
        }
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<OptionExchange> {
        let count = buf.try_get_u32_be()?;
        let mut options = Vec::new();
        for _ in 0..count {
            let option_type = buf.try_get_u32_be()?;
            let size = buf.try_get_u32_be()? as usize;
            let value = buf.try_get_padded_bytes(size)?;
            options.push(Cd11Option { option_type, value });
        }
        Ok(OptionExchange { options })
    }
}
