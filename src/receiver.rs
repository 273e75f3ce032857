use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::cd11::codec::{Cd11Codec, FrameCodec};
use crate::cd11::frame::MalformedFrame;
use crate::config::ReceiverConfig;
use crate::connman::connection_manager::ConnectionManager;
use crate::connman::station_registry::StationRegistry;
use crate::dataman::data_manager::DataManager;
use crate::dataman::frame_handler::StationServices;
use crate::dataman::rsdf::SequencedRsdf;
use crate::dataman::sinks::BoundedSink;
use crate::gaps::gap_store::GapPersistence;

/// What the receiver hands downstream
pub struct ReceiverOutputs {
    pub data_frames: mpsc::Receiver<SequencedRsdf>,
    pub malformed_frames: mpsc::Receiver<MalformedFrame>,
}

/// The complete receiver: admission on the well-known port plus the data listeners of all
///  acquired stations
pub struct StationReceiver {
    connection_manager: ConnectionManager,
    data_manager: DataManager,
}

impl StationReceiver {
    pub async fn start(config: ReceiverConfig, gap_persistence: Arc<dyn GapPersistence>) -> anyhow::Result<(StationReceiver, ReceiverOutputs)> {
        config.validate()?;
        let config = Arc::new(config);
        let codec: Arc<dyn FrameCodec> = Arc::new(Cd11Codec::new());

        let (rsdf_sink, data_frames) = BoundedSink::new("data frame", config.sink_buffer_size);
        let (malformed_sink, malformed_frames) = BoundedSink::new("malformed frame", config.sink_buffer_size);
        let services = StationServices {
            config: config.clone(),
            rsdf_sink: Arc::new(rsdf_sink),
            malformed_sink: Arc::new(malformed_sink),
            gap_persistence,
        };

        // stations must be reachable on their data ports before they are redirected there
        let data_manager = DataManager::start(services, codec.clone()).await?;
        let registry = StationRegistry::from_config(&config, &data_manager.data_ports());
        let connection_manager = ConnectionManager::start(config.clone(), Arc::new(registry), codec).await?;

        info!("station receiver started");
        let receiver = StationReceiver {
            connection_manager,
            data_manager,
        };
        let outputs = ReceiverOutputs {
            data_frames,
            malformed_frames,
        };
        Ok((receiver, outputs))
    }

    pub fn admission_addr(&self) -> SocketAddr {
        self.connection_manager.local_addr()
    }

    pub fn data_addr(&self, station_name: &str) -> Option<SocketAddr> {
        self.data_manager.local_addr(station_name)
    }

    /// Stops admission first so that no station is redirected to a listener that is going away
    pub async fn shutdown(self) {
        self.connection_manager.shutdown().await;
        self.data_manager.shutdown().await;
        info!("station receiver stopped");
    }
}
