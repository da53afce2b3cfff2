//! EPS (Evolved Packet System) NAS types
//!
//! EMM information elements as specified in 3GPP TS 24.301.

pub mod types;

pub use types::*;
