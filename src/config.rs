//! Receiver configuration, loaded from a JSON file. Every field has a default so that a config
//!  file only needs to list the stations.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::util::retry::RetryPolicy;

const MAX_GAP_EXPIRATION_DAYS: u64 = 100 * 365;
const MAX_GAP_STORAGE_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// CD1.1 station name as sent in CONNECTION_REQUEST frames
    pub name: String,
    /// the dedicated data port assigned to this station
    pub port: u16,
    /// stations that are configured but not acquired are admitted to nothing
    #[serde(default = "default_true")]
    pub acquired: bool,
    /// expected source address of the station's connections, overriding the global default
    #[serde(default)]
    pub data_provider_address: Option<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// our name in CD1.1 frames, max 8 characters
    #[serde(default = "default_responder_name")]
    pub responder_name: String,
    #[serde(default = "default_responder_type")]
    pub responder_type: String,
    #[serde(default = "default_service_type")]
    pub service_type: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_well_known_port")]
    pub well_known_port: u16,
    /// the address stations are told to connect to for data transfer
    #[serde(default = "default_data_consumer_address")]
    pub data_consumer_address: Ipv4Addr,
    /// expected source address for stations that do not configure their own, the unspecified
    ///  address accepts any source
    #[serde(default = "default_data_provider_address")]
    pub data_provider_address: IpAddr,

    #[serde(default = "default_bind_retries")]
    pub bind_retries: u32,
    #[serde(default = "default_bind_initial_wait_millis")]
    pub bind_initial_wait_millis: u64,
    #[serde(default = "default_admission_timeout_secs")]
    pub admission_timeout_secs: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// CD1.1 mandates an ACKNACK at least once per minute
    #[serde(default = "default_acknack_interval_secs")]
    pub acknack_interval_secs: u64,
    /// upper bound for writing a single frame to a data connection
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// 0 disables gap expiration
    #[serde(default)]
    pub gap_expiration_days: u64,
    #[serde(default = "default_gap_storage_interval_minutes")]
    pub gap_storage_interval_minutes: u64,
    #[serde(default = "default_gap_storage_path")]
    pub gap_storage_path: PathBuf,

    #[serde(default = "default_periodic_max_attempts")]
    pub periodic_max_attempts: u32,
    #[serde(default = "default_periodic_min_backoff_millis")]
    pub periodic_min_backoff_millis: u64,

    /// capacity of the data frame and malformed frame sinks
    #[serde(default = "default_sink_buffer_size")]
    pub sink_buffer_size: usize,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

fn default_true() -> bool {
    true
}

fn default_responder_name() -> String {
    "IDC".to_string()
}

fn default_responder_type() -> String {
    "IDC".to_string()
}

fn default_service_type() -> String {
    "TCP".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_well_known_port() -> u16 {
    8041
}

fn default_data_consumer_address() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_data_provider_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_bind_retries() -> u32 {
    10
}

fn default_bind_initial_wait_millis() -> u64 {
    1000
}

fn default_admission_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_secs() -> u64 {
    120
}

fn default_acknack_interval_secs() -> u64 {
    55
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_gap_storage_interval_minutes() -> u64 {
    5
}

fn default_gap_storage_path() -> PathBuf {
    PathBuf::from("gaps")
}

fn default_periodic_max_attempts() -> u32 {
    10
}

fn default_periodic_min_backoff_millis() -> u64 {
    500
}

fn default_sink_buffer_size() -> usize {
    1024
}

fn default_max_frame_len() -> usize {
    1024 * 1024
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            responder_name: default_responder_name(),
            responder_type: default_responder_type(),
            service_type: default_service_type(),
            bind_address: default_bind_address(),
            well_known_port: default_well_known_port(),
            data_consumer_address: default_data_consumer_address(),
            data_provider_address: default_data_provider_address(),
            bind_retries: default_bind_retries(),
            bind_initial_wait_millis: default_bind_initial_wait_millis(),
            admission_timeout_secs: default_admission_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            acknack_interval_secs: default_acknack_interval_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            gap_expiration_days: 0,
            gap_storage_interval_minutes: default_gap_storage_interval_minutes(),
            gap_storage_path: default_gap_storage_path(),
            periodic_max_attempts: default_periodic_max_attempts(),
            periodic_min_backoff_millis: default_periodic_min_backoff_millis(),
            sink_buffer_size: default_sink_buffer_size(),
            max_frame_len: default_max_frame_len(),
            stations: Vec::new(),
        }
    }
}

impl ReceiverConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<ReceiverConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: ReceiverConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {:?}", path))?;
        Ok(config)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_secs(self.admission_timeout_secs)
    }

    pub fn heartbeat_duration(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn acknack_interval(&self) -> Duration {
        Duration::from_secs(self.acknack_interval_secs)
    }

    /// `None` if gaps never expire
    pub fn gap_expiration(&self) -> Option<Duration> {
        if self.gap_expiration_days == 0 {
            None
        }
        else {
            Some(Duration::from_secs(self.gap_expiration_days.saturating_mul(24 * 60 * 60)))
        }
    }

    pub fn gap_storage_interval(&self) -> Duration {
        Duration::from_secs(self.gap_storage_interval_minutes.saturating_mul(60))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn bind_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.bind_retries, Duration::from_millis(self.bind_initial_wait_millis))
    }

    /// for ACKNACK sending, gap persistence and clearing of persisted gap state
    pub fn periodic_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.periodic_max_attempts, Duration::from_millis(self.periodic_min_backoff_millis))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.responder_name.is_empty() || self.responder_name.len() > 8 {
            bail!("responder name must have between 1 and 8 characters");
        }
        if self.responder_type.len() > 4 || self.service_type.len() > 4 {
            bail!("responder type and service type must have at most 4 characters");
        }
        if self.heartbeat_secs == 0 {
            bail!("heartbeat duration must be positive");
        }
        if self.acknack_interval_secs == 0 || self.acknack_interval_secs >= 60 {
            bail!("ACKNACK interval must be between 1 and 59 seconds");
        }
        if self.send_timeout_secs == 0 {
            bail!("send timeout must be positive");
        }
        // timer deadlines must stay representable
        if self.gap_expiration_days > MAX_GAP_EXPIRATION_DAYS {
            bail!("gap expiration must be at most {} days", MAX_GAP_EXPIRATION_DAYS);
        }
        if self.gap_storage_interval_minutes == 0 || self.gap_storage_interval_minutes > MAX_GAP_STORAGE_INTERVAL_MINUTES {
            bail!("gap storage interval must be between 1 and {} minutes", MAX_GAP_STORAGE_INTERVAL_MINUTES);
        }
        if self.sink_buffer_size == 0 {
            bail!("sink buffer size must be positive");
        }

        // port 0 binds an ephemeral port and can not collide
        let mut names = FxHashSet::default();
        let mut ports = FxHashSet::default();
        ports.insert(self.well_known_port);
        for station in &self.stations {
            if station.name.is_empty() || station.name.len() > 8 {
                bail!("invalid station name '{}': must have between 1 and 8 characters", station.name);
            }
            if !names.insert(station.name.as_str()) {
                bail!("station {} is configured more than once", station.name);
            }
            if station.acquired && station.port != 0 && !ports.insert(station.port) {
                bail!("port {} of station {} is already in use", station.port, station.name);
            }
        }
        Ok(())
    }
}
