//! Common NAS types shared between 5GS and EPS

pub mod types;

pub use types::*;
