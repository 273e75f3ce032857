use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};

use crate::util::buf_ext::{BufExt, BufMutExt};

pub const PROTOCOL_MAJOR_VERSION: u16 = 1;
pub const PROTOCOL_MINOR_VERSION: u16 = 1;

/// Payload of both CONNECTION_REQUEST and CONNECTION_RESPONSE: the two frames share their layout.
///  In a request, `name` / `name_type` identify the requesting station and the addresses are the
///  station's own; in a response they identify the responder and carry the address the station
///  should connect to for data transfer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionExchange {
    pub major_version: u16,
    pub minor_version: u16,
    pub name: String,
    pub name_type: String,
    pub service_type: String,
    pub primary_address: Ipv4Addr,
    pub primary_port: u16,
    pub secondary_address: Ipv4Addr,
    pub secondary_port: u16,
}

impl ConnectionExchange {
    pub const SERIALIZED_LEN: usize = 32;

    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_u16(self.major_version);
        buf.put_u16(self.minor_version);
        buf.put_fixed_string(&self.name, 8)?;
        buf.put_fixed_string(&self.name_type, 4)?;
        buf.put_fixed_string(&self.service_type, 4)?;
        buf.put_u32(self.primary_address.into());
        buf.put_u16(self.primary_port);
        buf.put_u32(self.secondary_address.into());
        buf.put_u16(self.secondary_port);
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ConnectionExchange> {
        Ok(ConnectionExchange {
            major_version: buf.try_get_u16_be()?,
            minor_version: buf.try_get_u16_be()?,
            name: buf.try_get_fixed_string(8)?,
            name_type: buf.try_get_fixed_string(4)?,
            service_type: buf.try_get_fixed_string(4)?,
            primary_address: Ipv4Addr::from(buf.try_get_u32_be()?),
            primary_port: buf.try_get_u16_be()?,
            secondary_address: Ipv4Addr::from(buf.try_get_u32_be()?),
            secondary_port: buf.try_get_u16_be()?,
        })
    }
}
