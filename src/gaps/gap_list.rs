//! Per-station bookkeeping of received and missing sequence numbers.
//!
//! Sequence numbers below the low water mark are accounted for, i.e. either received or given up
//!  on after their gap expired. Between the low and the high water mark, everything that is not
//!  inside a gap was received. The high water mark is the sequence number *after* the highest one
//!  that was ever observed.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cd11::acknack::{Acknack, NO_SEQUENCE_NUMBER};

/// A half-open range `[start, end)` of missing sequence numbers
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub start: u64,
    pub end: u64,
    pub first_observed: SystemTime,
}
impl Gap {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, sequence_number: u64) -> bool {
        self.start <= sequence_number && sequence_number < self.end
    }

    fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.first_observed)
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
pub struct GapList {
    low_water_mark: u64,
    high_water_mark: u64,
    /// keyed by gap start, non-overlapping, all inside `[low_water_mark, high_water_mark)`
    gaps: BTreeMap<u64, Gap>,
    /// sequence numbers that were dropped from tracking because their gap expired
    abandoned: u64,
    /// the lowest sequence number actually received, `None` before the first one
    #[serde(default)]
    lowest_received: Option<u64>,
}

impl GapList {
    pub fn new() -> GapList {
        Default::default()
    }

    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.values()
    }

    pub fn num_gaps(&self) -> usize {
        self.gaps.len()
    }

    pub fn total_missing(&self) -> u64 {
        self.gaps.values()
            .map(|g| g.len())
            .sum()
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned
    }

    pub fn is_empty(&self) -> bool {
        self.high_water_mark == 0
    }

    pub fn process_sequence_number(&mut self, sequence_number: u64) {
        self.process_sequence_number_at(sequence_number, SystemTime::now())
    }

    pub fn process_sequence_number_at(&mut self, sequence_number: u64, now: SystemTime) {
        if sequence_number == NO_SEQUENCE_NUMBER {
            warn!("ignoring reserved sequence number {}", sequence_number);
            return;
        }
        if sequence_number < self.low_water_mark {
            trace!("sequence number {} is below the low water mark - ignoring", sequence_number);
            return;
        }

        if sequence_number >= self.high_water_mark {
            if sequence_number > self.high_water_mark {
                debug!("new gap [{}, {})", self.high_water_mark, sequence_number);
                self.gaps.insert(self.high_water_mark, Gap {
                    start: self.high_water_mark,
                    end: sequence_number,
                    first_observed: now,
                });
            }
            self.high_water_mark = sequence_number + 1;
            self.note_received(sequence_number);
        }
        else if self.fill(sequence_number) {
            self.note_received(sequence_number);
        }

        self.update_low_water_mark();
    }

    fn note_received(&mut self, sequence_number: u64) {
        self.lowest_received = Some(match self.lowest_received {
            Some(lowest) => lowest.min(sequence_number),
            None => sequence_number,
        });
    }

    /// returns `false` if the sequence number was not missing
    fn fill(&mut self, sequence_number: u64) -> bool {
        let gap = match self.gaps.range(..=sequence_number).next_back() {
            Some((_, gap)) if gap.contains(sequence_number) => gap.clone(),
            _ => {
                trace!("sequence number {} was received before - ignoring", sequence_number);
                return false;
            }
        };

        self.gaps.remove(&gap.start);
        if gap.start < sequence_number {
            self.gaps.insert(gap.start, Gap {
                start: gap.start,
                end: sequence_number,
                first_observed: gap.first_observed,
            });
        }
        if sequence_number + 1 < gap.end {
            self.gaps.insert(sequence_number + 1, Gap {
                start: sequence_number + 1,
                end: gap.end,
                first_observed: gap.first_observed,
            });
        }
        true
    }

    fn update_low_water_mark(&mut self) {
        self.low_water_mark = self.gaps.keys()
            .next()
            .copied()
            .unwrap_or(self.high_water_mark);
    }

    /// Checks a peer's ACKNACK for signs that the peer restarted its sequence numbering: if the
    ///  highest sequence number the peer reports is below the highest one we already received, our
    ///  bookkeeping refers to a numbering the peer no longer uses. Returns an error in that case.
    pub fn check_for_reset(&self, acknack: &Acknack) -> anyhow::Result<()> {
        if acknack.highest_seq_num == NO_SEQUENCE_NUMBER || self.is_empty() {
            return Ok(());
        }

        let our_highest = self.high_water_mark - 1;
        if acknack.highest_seq_num < our_highest {
            bail!("peer reports highest sequence number {}, but {} was already received - peer reset its sequence numbers",
                acknack.highest_seq_num, our_highest);
        }
        Ok(())
    }

    pub fn remove_expired_gaps(&mut self, max_age: Duration) {
        self.remove_expired_gaps_at(max_age, SystemTime::now())
    }

    /// Removes every gap that was first observed `max_age` or longer before `now`. The removed
    ///  sequence numbers are counted as abandoned rather than received, and the high water mark is
    ///  not affected.
    pub fn remove_expired_gaps_at(&mut self, max_age: Duration, now: SystemTime) {
        let expired = self.gaps.values()
            .filter(|g| g.age(now) >= max_age)
            .map(|g| g.start)
            .collect::<Vec<_>>();

        for start in expired {
            if let Some(gap) = self.gaps.remove(&start) {
                warn!("gap [{}, {}) expired, giving up on {} frames", gap.start, gap.end, gap.len());
                self.abandoned += gap.len();
            }
        }

        self.update_low_water_mark();
    }

    pub fn reset_gaps_list(&mut self) {
        *self = GapList::new();
    }

    /// an independent copy for persistence or for building an ACKNACK
    pub fn get_gap_list(&self) -> GapList {
        self.clone()
    }

    /// gaps in ACKNACK representation
    pub fn gap_ranges(&self) -> Vec<(u64, u64)> {
        self.gaps.values()
            .map(|g| (g.start, g.end))
            .collect()
    }

    /// The highest sequence number received, or the CD1.1 'none' sentinel
    pub fn highest_received(&self) -> u64 {
        self.high_water_mark.checked_sub(1)
            .unwrap_or(NO_SEQUENCE_NUMBER)
    }

    /// The lowest sequence number received, or the CD1.1 'none' sentinel. Unlike the low water
    ///  mark, this is always a sequence number that actually arrived.
    pub fn lowest_received(&self) -> u64 {
        self.lowest_received.unwrap_or(NO_SEQUENCE_NUMBER)
    }

    /// Checks structural consistency, e.g. for a gap list that was read from storage
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.low_water_mark > self.high_water_mark {
            bail!("low water mark {} is above high water mark {}", self.low_water_mark, self.high_water_mark);
        }

        let mut prev_end = None;
        for (&key, gap) in &self.gaps {
            if key != gap.start {
                bail!("gap [{}, {}) stored under key {}", gap.start, gap.end, key);
            }
            if gap.start >= gap.end {
                bail!("empty gap [{}, {})", gap.start, gap.end);
            }
            if gap.start < self.low_water_mark || gap.end > self.high_water_mark {
                bail!("gap [{}, {}) outside of water marks [{}, {})", gap.start, gap.end, self.low_water_mark, self.high_water_mark);
            }
            if let Some(prev_end) = prev_end {
                if gap.start < prev_end {
                    bail!("gap [{}, {}) overlaps with its predecessor", gap.start, gap.end);
                }
            }
            prev_end = Some(gap.end);
        }

        let expected_low = self.gaps.keys().next().copied().unwrap_or(self.high_water_mark);
        if expected_low != self.low_water_mark {
            bail!("low water mark {} does not match the first gap", self.low_water_mark);
        }

        match self.lowest_received {
            Some(lowest) if lowest >= self.high_water_mark => bail!("lowest received sequence number {} is not below high water mark {}", lowest, self.high_water_mark),
            Some(lowest) if self.gaps.values().any(|g| g.contains(lowest)) => bail!("lowest received sequence number {} is inside a gap", lowest),
            _ => {}
        }
        Ok(())
    }
}
