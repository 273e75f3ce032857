use bytes::{Buf, BufMut};

use crate::util::buf_ext::{BufExt, BufMutExt};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandResponse {
    pub responder_station: String,
    /// CD1.1 time stamp, `yyyyddd hh:mm:ss.mmm`
    pub command_timestamp: String,
    pub command_request: String,
    pub command_response: String,
}

impl CommandResponse {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_fixed_string(&self.responder_station, 8)?;
        buf.put_fixed_string(&self.command_timestamp, 20)?;
        buf.put_sized_string(&self.command_request)?;
        buf.put_sized_string(&self.command_response)?;
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<CommandResponse> {
        Ok(CommandResponse {
            responder_station: buf.try_get_fixed_string(8)?,
            command_timestamp: buf.try_get_fixed_string(20)?,
            command_request: buf.try_get_sized_string()?,
            command_response: buf.try_get_sized_string()?,
        })
    }
}
