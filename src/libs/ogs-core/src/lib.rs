//! NextGCore Core Library
//!
//! Event-loop building blocks shared by the network functions.

pub mod async_timer; // One-shot timers keyed by epoch handle
pub mod log;         // Logging facade and initialization

pub use async_timer::{compute_poll_interval, AsyncTimerEntry, AsyncTimerMgr};
pub use log::{ogs_log_init, OgsLogLevel};
