//! Admission: the well-known port where stations learn which data port to connect to

pub mod connection_manager;
pub mod station_registry;
