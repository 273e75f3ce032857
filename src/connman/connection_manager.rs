use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tracing::{debug, info, instrument, warn};

use crate::cd11::codec::FrameCodec;
use crate::cd11::frame::Cd11Payload;
use crate::cd11::frame_factory::FrameFactory;
use crate::cd11::frame_reader::read_raw_frame;
use crate::config::ReceiverConfig;
use crate::connman::station_registry::{Admission, StationRegistry};
use crate::util::net::{accept_next, bind_with_retry};

/// Listens on the well-known port and redirects stations to their data ports. Every admission
///  connection carries exactly one request and is closed afterwards; requests that are not
///  admitted get no response at all.
pub struct ConnectionManager {
    local_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.accept_handle.abort();
    }
}

impl ConnectionManager {
    pub async fn start(config: Arc<ReceiverConfig>, registry: Arc<StationRegistry>, codec: Arc<dyn FrameCodec>) -> anyhow::Result<ConnectionManager> {
        let addr = SocketAddr::new(config.bind_address, config.well_known_port);
        let listener = bind_with_retry(addr, &config.bind_retry_policy()).await
            .context("binding the well-known port")?;
        let local_addr = listener.local_addr()?;
        info!("accepting connection requests on {}", local_addr);

        let context = Arc::new(AdmissionContext {
            config,
            registry,
            codec,
        });
        let accept_handle = tokio::spawn(accept_loop(listener, context));

        Ok(ConnectionManager {
            local_addr,
            accept_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops listening. Admissions that are in progress are abandoned.
    pub async fn shutdown(mut self) {
        info!("shutting down connection manager");
        self.accept_handle.abort();
        let _ = (&mut self.accept_handle).await;
    }
}

async fn accept_loop(listener: TcpListener, context: Arc<AdmissionContext>) {
    let mut admissions = JoinSet::new();

    loop {
        select! {
            (stream, peer) = accept_next(&listener) => {
                let context = context.clone();
                admissions.spawn(async move {
                    context.handle_admission(stream, peer).await;
                });
            }
            Some(_) = admissions.join_next() => {}
        }
    }
}

struct AdmissionContext {
    config: Arc<ReceiverConfig>,
    registry: Arc<StationRegistry>,
    codec: Arc<dyn FrameCodec>,
}

impl AdmissionContext {
    #[instrument(name = "admission", skip_all, fields(peer = %peer))]
    async fn handle_admission(&self, mut stream: TcpStream, peer: SocketAddr) {
        let timeout = self.config.admission_timeout();
        match time::timeout(timeout, self.try_admit(&mut stream, peer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("connection request not admitted: {:#}", e),
            Err(_) => debug!("no connection request within {:?}", timeout),
        }
        let _ = stream.shutdown().await;
    }

    async fn try_admit(&self, stream: &mut TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let raw = read_raw_frame(stream, self.config.max_frame_len).await?
            .ok_or_else(|| anyhow!("connection closed without a request"))?;
        let frame = self.codec.decode(raw, SystemTime::now())
            .map_err(|malformed| anyhow!("{}", malformed))?;

        let request = match &frame.payload {
            Cd11Payload::ConnectionRequest(request) => request,
            _ => bail!("expected CONNECTION_REQUEST, received {:?}", frame.frame_type()),
        };
        let station_name = request.name.as_str();

        let data_port = match self.registry.admit(station_name, peer.ip()) {
            Admission::Accepted { data_port } => data_port,
            Admission::IgnoredStation => {
                debug!("ignoring connection request from station {}", station_name);
                return Ok(());
            }
            rejection => bail!("station {}: {:?}", station_name, rejection),
        };

        let mut frame_factory = FrameFactory::new(&self.config.responder_name, station_name);
        let response = frame_factory.connection_response(
            &self.config.responder_type,
            &self.config.service_type,
            self.config.data_consumer_address,
            data_port,
        );
        let raw = self.codec.encode(&response)?;
        stream.write_all(&raw).await?;

        info!("station {} admitted, redirected to {}:{}", station_name, self.config.data_consumer_address, data_port);
        Ok(())
    }
}
