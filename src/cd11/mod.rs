//! CD1.1 frames: the typed model, the binary codec and frame-level helpers

pub mod acknack;
pub mod alert;
pub mod channel_subframe;
pub mod codec;
pub mod command_response;
pub mod connection_exchange;
pub mod data_frame;
pub mod frame;
pub mod frame_factory;
pub mod frame_reader;
pub mod frame_type;
pub mod option_exchange;
pub mod timestamp;
