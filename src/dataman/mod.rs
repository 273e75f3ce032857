//! The data side of the receiver: live station connections and what happens to their frames

pub mod connection;
pub mod data_manager;
pub mod frame_handler;
pub mod rsdf;
pub mod sinks;
