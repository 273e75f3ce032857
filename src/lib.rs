//! Receiving side of the CD1.1 station data link: admission of stations on a well-known port,
//!  one long-lived data connection per station, and tracking of the sequence numbers that are
//!  still missing from each station's stream.

pub mod cd11;
pub mod config;
pub mod connman;
pub mod dataman;
pub mod gaps;
pub mod receiver;
pub mod util;

#[cfg(test)]
pub mod test_util;
