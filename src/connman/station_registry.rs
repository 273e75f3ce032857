use std::net::IpAddr;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::info;

use crate::config::ReceiverConfig;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StationEntry {
    pub name: String,
    /// the unspecified address admits any source
    pub expected_address: IpAddr,
    pub data_port: u16,
}

/// The outcome of looking up a CONNECTION_REQUEST
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Admission {
    Accepted { data_port: u16 },
    UnknownStation,
    IgnoredStation,
    AddressMismatch,
}

/// Known stations and where their data goes. Built once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: FxHashMap<String, StationEntry>,
    ignored: FxHashSet<String>,
}

impl StationRegistry {
    /// `data_ports` holds the ports the station listeners are actually bound to; stations that
    ///  are missing there are announced with their configured port
    pub fn from_config(config: &ReceiverConfig, data_ports: &FxHashMap<String, u16>) -> StationRegistry {
        let mut registry = StationRegistry::default();

        for station in &config.stations {
            if !station.acquired {
                info!("station {} is configured but not acquired - its connection requests will be ignored", station.name);
                registry.ignored.insert(station.name.clone());
                continue;
            }

            registry.stations.insert(station.name.clone(), StationEntry {
                name: station.name.clone(),
                expected_address: station.data_provider_address.unwrap_or(config.data_provider_address),
                data_port: data_ports.get(&station.name).copied().unwrap_or(station.port),
            });
        }
        registry
    }

    pub fn admit(&self, station_name: &str, source: IpAddr) -> Admission {
        if self.ignored.contains(station_name) {
            return Admission::IgnoredStation;
        }

        match self.stations.get(station_name) {
            None => Admission::UnknownStation,
            Some(entry) => {
                let expected = entry.expected_address.to_canonical();
                if !expected.is_unspecified() && expected != source.to_canonical() {
                    Admission::AddressMismatch
                }
                else {
                    Admission::Accepted { data_port: entry.data_port }
                }
            }
        }
    }

    pub fn acquired_stations(&self) -> impl Iterator<Item = &StationEntry> {
        self.stations.values()
    }
}
