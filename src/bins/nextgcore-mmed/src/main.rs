//! NextGCore MME (Mobility Management Entity)
//!
//! EMM common procedures of the MME: Authentication, Identification and
//! Security Mode Control, with their NAS timers and the S6a
//! Authentication-Information exchange that feeds them.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod config;
pub mod context;
pub mod emm_auth;
pub mod emm_auth_info;
pub mod emm_ident;
pub mod emm_proc;
pub mod emm_reg;
pub mod emm_sap;
pub mod emm_sm;
pub mod emm_smc;
pub mod error;
pub mod nas_security;
pub mod timer;


use ogs_core::{ogs_log_init, OgsLogLevel};

/// Longest sleep of the main loop when no timer is armed
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// NextGCore MME - Mobility Management Entity
#[derive(Parser, Debug)]
#[command(name = "nextgcore-mmed")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EPC Mobility Management Entity")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nextgcore/mme.yaml")]
    config: String,

    /// Log level (none, fatal, error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: OgsLogLevel,

    /// Disable color output
    #[arg(long)]
    no_color: bool,

    /// Run in daemon mode
    #[arg(short, long)]
    daemon: bool,
}

/// MME application state
pub struct MmeApp {
    /// Running flag
    running: Arc<AtomicBool>,
    /// EMM common procedure task
    emm: emm_sm::EmmTask,
}

impl MmeApp {
    pub fn new(config: config::MmeNasConfig) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            emm: emm_sm::EmmTask::new(config),
        }
    }

    /// Build the application from a configuration file
    pub fn init(config_path: &str) -> Result<Self> {
        log::info!("Initializing MME...");
        let config = config::MmeNasConfig::load(Path::new(config_path))?;
        log::debug!(
            "T3460 {}s x{}, T3470 {}s x{}, sync failure max {}",
            config.t3460.duration,
            config.t3460.max_count,
            config.t3470.duration,
            config.t3470.max_count,
            config.sync_failure_max
        );
        log::info!("MME initialized successfully");
        Ok(Self::new(config))
    }

    /// Fire expired timers and hand the resulting primitives over.
    pub fn poll(&mut self, now: Instant, dispatcher: &mut dyn emm_sap::EmmSapDispatcher) -> usize {
        let fired = self.emm.poll_timers(now);
        self.emm.dispatch(dispatcher);
        fired
    }

    /// Run the MME main loop
    pub async fn run_async(&mut self) -> Result<()> {
        log::info!("MME running (async mode)...");
        let mut dispatcher = emm_sap::LoggingSapDispatcher;

        while self.running.load(Ordering::SeqCst) {
            let fired = self.poll(Instant::now(), &mut dispatcher);
            if fired > 0 {
                log::debug!("Processed {} timer expiries", fired);
            }
            tokio::time::sleep(self.emm.poll_interval(MAX_POLL_INTERVAL)).await;
        }

        log::info!("MME main loop exited");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        log::info!("Shutting down MME...");
        log::debug!("{} UE contexts released", self.emm.context_count());
        log::info!("MME shutdown complete");
    }

    /// Signal the application to stop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get the running flag for signal handlers
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn emm(&mut self) -> &mut emm_sm::EmmTask {
        &mut self.emm
    }
}

impl Default for MmeApp {
    fn default() -> Self {
        Self::new(config::MmeNasConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    ogs_log_init(args.log_level, args.no_color);

    log::info!("NextGCore MME v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {}", args.config);
    if args.daemon {
        log::warn!("Daemon mode is not supported, running in foreground");
    }

    let mut app = MmeApp::init(&args.config)?;

    let running = app.running_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    app.run_async().await?;
    app.shutdown();

    log::info!("NextGCore MME terminated");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
