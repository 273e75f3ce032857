pub mod buf_ext;
pub mod net;
pub mod retry;
