//! Runs the CD1.1 station receiver until Ctrl-C.
//!
//! ```bash
//! cd11-station-receiver --config receiver.json
//! RUST_LOG=debug cd11-station-receiver --config receiver.json --well-known-port 8041 --gap-storage-path /var/lib/cd11/gaps
//! ```
//!
//! Received data frames are logged; downstream storage is not part of this binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};

use cd11_station_receiver::config::ReceiverConfig;
use cd11_station_receiver::gaps::gap_store::FileGapPersistence;
use cd11_station_receiver::receiver::StationReceiver;

#[derive(Parser, Debug)]
#[command(name = "cd11-station-receiver")]
#[command(about = "Receives CD1.1 station data: connection admission, data connections and gap tracking", long_about = None)]
struct Args {
    /// JSON config file, defaults apply to everything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for connection requests, overrides the config file
    #[arg(long)]
    well_known_port: Option<u16>,

    /// Directory for persisted gap state, overrides the config file
    #[arg(long)]
    gap_storage_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ReceiverConfig::from_file(path)?,
        None => ReceiverConfig::default(),
    };
    if let Some(port) = args.well_known_port {
        config.well_known_port = port;
    }
    if let Some(path) = args.gap_storage_path {
        config.gap_storage_path = path;
    }
    if config.stations.is_empty() {
        warn!("no stations configured");
    }

    info!("well-known port {}, {} stations, gap state in {:?}", config.well_known_port, config.stations.len(), config.gap_storage_path);

    let persistence = Arc::new(FileGapPersistence::new(&config.gap_storage_path));
    let (receiver, outputs) = StationReceiver::start(config, persistence).await?;
    let mut data_frames = outputs.data_frames;
    let mut malformed_frames = outputs.malformed_frames;

    let data_drain = tokio::spawn(async move {
        while let Some(frame) = data_frames.recv().await {
            debug!("data frame {} from {}: {:?} {:?}", frame.sequence_number, frame.rsdf.station_name, frame.rsdf.nominal_time, frame.rsdf.channel_names);
        }
    });
    let malformed_drain = tokio::spawn(async move {
        while let Some(malformed) = malformed_frames.recv().await {
            info!("{}", malformed);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");

    receiver.shutdown().await;
    data_drain.abort();
    malformed_drain.abort();
    Ok(())
}
