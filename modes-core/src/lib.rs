//! modes-core: Pure demodulation, decode + tracking library for Mode S / ADS-B.
//!
//! No async, no I/O — just algorithms. This crate is the shared core used by
//! the `modes-rx` receiver binary: magnitude computation, preamble detection,
//! CRC repair, frame decoding, CPR position resolution and the live aircraft
//! fleet.

pub mod cpr;
pub mod crc;
pub mod decode;
pub mod demod;
pub mod icao;
pub mod magnitude;
pub mod sbs;
pub mod stats;
pub mod track;
pub mod types;

// Re-export commonly used types at crate root
pub use decode::decode_message;
pub use icao::IcaoCache;
pub use stats::Stats;
pub use track::{Aircraft, Tracker};
pub use types::*;
