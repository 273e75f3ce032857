pub mod frames;
pub mod sender;
