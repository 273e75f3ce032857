use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;

use crate::cd11::frame::Cd11Frame;
use crate::cd11::frame_type::FrameType;
use crate::dataman::connection::FrameSender;

/// Records every frame that is sent, and can be switched to fail all sends or to let them hang
#[derive(Debug, Default)]
pub struct TrackingFrameSender {
    sent: Mutex<Vec<Cd11Frame>>,
    send_attempts: AtomicUsize,
    close_count: AtomicUsize,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl TrackingFrameSender {
    pub fn new() -> Arc<TrackingFrameSender> {
        Default::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// sends never complete, like writes to a peer that stopped reading
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn sent_frames(&self) -> Vec<Cd11Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn num_sent(&self, frame_type: FrameType) -> usize {
        self.sent.lock().unwrap()
            .iter()
            .filter(|f| f.frame_type() == frame_type)
            .count()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSender for TrackingFrameSender {
    async fn send(&self, frame: &Cd11Frame) -> anyhow::Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated send failure");
        }
        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}
