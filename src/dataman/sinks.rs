//! Downstream outputs of the data connections. Emitting never blocks: the sinks are bounded
//!  channels that drop the newest item when full, counting and logging every dropped item.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::cd11::frame::MalformedFrame;
use crate::dataman::rsdf::{RawStationDataFrame, SequencedRsdf};

pub trait RsdfSink: Send + Sync + 'static {
    fn emit(&self, rsdf: RawStationDataFrame, sequence_number: u64);
}

pub trait MalformedFrameSink: Send + Sync + 'static {
    fn emit(&self, malformed: MalformedFrame);
}

pub struct BoundedSink<T> {
    name: &'static str,
    sender: mpsc::Sender<T>,
    dropped: AtomicU64,
}

impl <T: Send + 'static> BoundedSink<T> {
    pub fn new(name: &'static str, capacity: usize) -> (BoundedSink<T>, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let sink = BoundedSink {
            name,
            sender,
            dropped: AtomicU64::new(0),
        };
        (sink, receiver)
    }

    pub fn num_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn offer(&self, item: T) {
        let reason = match self.sender.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "full",
            Err(TrySendError::Closed(_)) => "closed",
        };
        let num_dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("{} sink is {}, dropping item ({} dropped so far)", self.name, reason, num_dropped);
    }
}

impl RsdfSink for BoundedSink<SequencedRsdf> {
    fn emit(&self, rsdf: RawStationDataFrame, sequence_number: u64) {
        self.offer(SequencedRsdf {
            rsdf,
            sequence_number,
        });
    }
}

impl MalformedFrameSink for BoundedSink<MalformedFrame> {
    fn emit(&self, malformed: MalformedFrame) {
        self.offer(malformed);
    }
}
