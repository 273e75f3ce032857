use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn, Instrument, Span};

use crate::cd11::codec::FrameCodec;
use crate::cd11::frame::{Cd11Frame, MalformedFrame};
use crate::cd11::frame_reader::read_raw_frame;

pub type InboundFrame = Result<Cd11Frame, MalformedFrame>;

/// The outbound half of a data connection. This trait exists to facilitate mocking the I/O part
///  away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSender: Send + Sync + 'static {
    async fn send(&self, frame: &Cd11Frame) -> anyhow::Result<()>;

    /// idempotent
    async fn close(&self);
}

/// A live CD1.1 data connection. Inbound frames are decoded by a reader task and delivered through
///  a channel in wire order; the channel is closed when the connection ends.
pub struct Cd11Connection {
    peer: SocketAddr,
    codec: Arc<dyn FrameCodec>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// covers waiting for the writer as well as the write itself
    send_timeout: Duration,
    reader_handle: JoinHandle<()>,
}

impl Drop for Cd11Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl Cd11Connection {
    pub fn open(stream: TcpStream, peer: SocketAddr, codec: Arc<dyn FrameCodec>, max_frame_len: usize, send_timeout: Duration) -> (Arc<Cd11Connection>, mpsc::Receiver<InboundFrame>) {
        let (read_half, write_half) = stream.into_split();
        let (send, recv) = mpsc::channel(64);

        let reader_handle = tokio::spawn(
            read_loop(read_half, codec.clone(), max_frame_len, send)
                .instrument(Span::current())
        );

        let connection = Arc::new(Cd11Connection {
            peer,
            codec,
            writer: Mutex::new(Some(write_half)),
            send_timeout,
            reader_handle,
        });
        (connection, recv)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn write(&self, raw: &[u8]) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => {
                writer.write_all(raw).await?;
                Ok(())
            }
            None => bail!("connection to {} is closed", self.peer),
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, codec: Arc<dyn FrameCodec>, max_frame_len: usize, inbound: mpsc::Sender<InboundFrame>) {
    loop {
        match read_raw_frame(&mut reader, max_frame_len).await {
            Ok(Some(raw)) => {
                let decoded = codec.decode(raw, SystemTime::now());
                if inbound.send(decoded).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("connection closed by peer");
                break;
            }
            Err(e) => {
                warn!("error reading from data connection: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl FrameSender for Cd11Connection {
    async fn send(&self, frame: &Cd11Frame) -> anyhow::Result<()> {
        let raw = self.codec.encode(frame)?;
        time::timeout(self.send_timeout, self.write(&raw)).await
            .map_err(|_| anyhow!("sending to {} did not complete within {:?}", self.peer, self.send_timeout))?
    }

    async fn close(&self) {
        self.reader_handle.abort();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
            debug!("closed connection to {}", self.peer);
        }
    }
}
