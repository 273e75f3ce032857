use std::net::SocketAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::{pin, select};
use tracing::{debug, info, instrument, warn};

use crate::cd11::codec::FrameCodec;
use crate::dataman::connection::Cd11Connection;
use crate::dataman::frame_handler::{StationFrameHandler, StationServices};
use crate::gaps::gap_list::GapList;
use crate::util::net::{accept_next, bind_with_retry};

/// Owns the data side of the receiver: one listener on each acquired station's dedicated port,
///  each with a station unit that handles that station's connections one at a time.
pub struct DataManager {
    local_addrs: FxHashMap<String, SocketAddr>,
    shutdown: watch::Sender<bool>,
    station_handles: Vec<JoinHandle<()>>,
}

impl Drop for DataManager {
    fn drop(&mut self) {
        for handle in &self.station_handles {
            handle.abort();
        }
    }
}

impl DataManager {
    /// Binds all station ports before accepting anything, so that a port that can not be bound
    ///  fails startup as a whole.
    pub async fn start(services: StationServices, codec: Arc<dyn FrameCodec>) -> anyhow::Result<DataManager> {
        let config = services.config.clone();
        let bind_policy = config.bind_retry_policy();

        let mut units = Vec::new();
        let mut local_addrs = FxHashMap::default();
        let (shutdown_send, _) = watch::channel(false);

        for station in config.stations.iter().filter(|s| s.acquired) {
            let listener = bind_with_retry(SocketAddr::new(config.bind_address, station.port), &bind_policy).await?;
            let local_addr = listener.local_addr()?;
            info!("listening for data from station {} on {}", station.name, local_addr);

            let gap_list = load_gap_list(&services, &station.name).await;
            local_addrs.insert(station.name.clone(), local_addr);
            units.push(StationUnit {
                station_name: station.name.clone(),
                port: local_addr.port(),
                listener,
                services: services.clone(),
                codec: codec.clone(),
                gap_list,
                shutdown: shutdown_send.subscribe(),
            });
        }

        let station_handles = units.into_iter()
            .map(|unit| tokio::spawn(unit.run()))
            .collect();

        Ok(DataManager {
            local_addrs,
            shutdown: shutdown_send,
            station_handles,
        })
    }

    pub fn local_addr(&self, station_name: &str) -> Option<SocketAddr> {
        self.local_addrs.get(station_name).copied()
    }

    /// the actual data port of each acquired station, as announced in CONNECTION_RESPONSE frames
    pub fn data_ports(&self) -> FxHashMap<String, u16> {
        self.local_addrs.iter()
            .map(|(name, addr)| (name.clone(), addr.port()))
            .collect()
    }

    /// Terminates all live connections (with an ALERT to the station) and waits for the station
    ///  units to store their gap state
    pub async fn shutdown(mut self) {
        info!("shutting down data connections");
        let _ = self.shutdown.send(true);

        for handle in std::mem::take(&mut self.station_handles) {
            if let Err(e) = handle.await {
                warn!("station unit did not terminate cleanly: {}", e);
            }
        }
    }
}

async fn load_gap_list(services: &StationServices, station_name: &str) -> GapList {
    match services.gap_persistence.load(station_name).await {
        Ok(Some(gap_list)) => {
            info!("restored gap state for station {}: {} gaps, next expected sequence number {}",
                station_name, gap_list.num_gaps(), gap_list.high_water_mark());
            gap_list
        }
        Ok(None) => GapList::new(),
        Err(e) => {
            warn!("error loading gap state for station {} - starting without gaps: {:#}", station_name, e);
            GapList::new()
        }
    }
}

struct StationUnit {
    station_name: String,
    port: u16,
    listener: TcpListener,
    services: StationServices,
    codec: Arc<dyn FrameCodec>,
    gap_list: GapList,
    shutdown: watch::Receiver<bool>,
}

impl StationUnit {
    #[instrument(name = "station", skip_all, fields(station = %self.station_name, port = self.port))]
    async fn run(mut self) {
        let mut pending: Option<(TcpStream, SocketAddr)> = None;
        let mut stopping = false;

        while !stopping {
            let (stream, peer) = match pending.take() {
                Some(accepted) => accepted,
                None => select! {
                    accepted = accept_next(&self.listener) => accepted,
                    _ = self.shutdown.changed() => break,
                },
            };

            debug!("accepted data connection from {}", peer);
            let (connection, inbound) = Cd11Connection::open(stream, peer, self.codec.clone(), self.services.config.max_frame_len, self.services.config.send_timeout());
            let (handler, handle) = StationFrameHandler::new(&self.station_name, self.port, self.services.clone(), connection, inbound);

            let termination = {
                let run = handler.run(&mut self.gap_list);
                pin!(run);

                loop {
                    select! {
                        termination = &mut run => break termination,
                        accepted = accept_next(&self.listener), if pending.is_none() && !stopping => {
                            info!("data connection from {} supersedes the one from {}", accepted.1, peer);
                            pending = Some(accepted);
                            handle.shutdown();
                        }
                        _ = self.shutdown.changed(), if !stopping => {
                            stopping = true;
                            handle.shutdown();
                        }
                    }
                }
            };
            debug!("data connection from {} ended: {:?}", peer, termination);

            self.persist().await;
        }

        if let Some((_, peer)) = pending {
            debug!("dropping data connection from {} because of shutdown", peer);
        }
        info!("station unit terminated");
    }

    async fn persist(&self) {
        let persistence = self.services.gap_persistence.as_ref();
        let policy = self.services.config.periodic_retry_policy();
        let station_name = self.station_name.as_str();
        let gap_list = &self.gap_list;

        if let Err(e) = policy.retry("persisting gap state", move || persistence.persist(station_name, gap_list)).await {
            warn!("{:#}", e);
        }
    }
}
