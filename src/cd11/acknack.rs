use bytes::{Buf, BufMut};

use crate::util::buf_ext::{BufExt, BufMutExt};

pub const FRAME_SET_LEN: usize = 20;

/// Sentinel used for the sequence number fields when nothing has been received yet
pub const NO_SEQUENCE_NUMBER: u64 = u64::MAX;

/// ACKNACK payload. Gaps are `(start, end)` with `start` inclusive and `end` exclusive.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Acknack {
    pub frame_set_acked: String,
    pub lowest_seq_num: u64,
    pub highest_seq_num: u64,
    pub gaps: Vec<(u64, u64)>,
}

impl Acknack {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_fixed_string(&self.frame_set_acked, FRAME_SET_LEN)?;
        buf.put_u64(self.lowest_seq_num);
        buf.put_u64(self.highest_seq_num);
        buf.put_u32(u32::try_from(self.gaps.len())?);
        for &(start, end) in &self.gaps {
            buf.put_u64(start);
            buf.put_u64(end);
        }
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Acknack> {
        let frame_set_acked = buf.try_get_fixed_string(FRAME_SET_LEN)?;
        let lowest_seq_num = buf.try_get_u64_be()?;
        let highest_seq_num = buf.try_get_u64_be()?;
        let gap_count = buf.try_get_u32_be()?;

        let mut gaps = Vec::new();
        for _ in 0..gap_count {
            let start = buf.try_get_u64_be()?;
            let end = buf.try_get_u64_be()?;
            gaps.push((start, end));
        }

        Ok(Acknack {
            frame_set_acked,
            lowest_seq_num,
            highest_seq_num,
            gaps,
        })
    }
}
