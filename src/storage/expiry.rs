//! Background Cron
//!
//! The engine never calls the OS clock while serving: handlers read a
//! second-granular clock owned by the engine, and this module keeps that
//! clock fresh. Once per tick the cron locks the engine, advances
//! `stats.time`, and bumps the cron counter.
//!
//! The cron is also where background expiry lives. Lazy expiry (checking
//! on access) is the authoritative path, but an item that is never
//! touched again would otherwise sit in memory forever, so every few
//! ticks the cron sweeps the whole index and destroys anything whose TTL
//! has run out. The sweep uses the same reap path as lazy expiry, so the
//! invariant "observing an expired item destroys it" holds either way.

use crate::storage::Engine;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info};

/// Configuration for the cron task.
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Interval between ticks (default: 1s, matching the clock's
    /// granularity).
    pub interval: Duration,

    /// Run a full expired-item sweep every this many ticks.
    pub sweep_every: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            sweep_every: 30,
        }
    }
}

/// A handle to the running cron task.
///
/// When this handle is dropped, the task stops.
#[derive(Debug)]
pub struct Cron {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl Cron {
    /// Starts the cron as a background task.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use prefixkv::storage::{Cron, CronConfig, Engine, EngineConfig};
    /// use std::sync::{Arc, Mutex};
    ///
    /// let engine = Arc::new(Mutex::new(Engine::new(EngineConfig::default())));
    /// let cron = Cron::start(Arc::clone(&engine), CronConfig::default());
    ///
    /// // Clock refresh and sweeps run in the background...
    ///
    /// // Dropping the handle stops the task
    /// drop(cron);
    /// ```
    pub fn start(engine: Arc<Mutex<Engine>>, config: CronConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(cron_loop(engine, config, shutdown_rx));

        info!("Background cron started");

        Self { shutdown_tx }
    }

    /// Stops the cron task.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Background cron stopped");
    }
}

impl Drop for Cron {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main cron loop.
async fn cron_loop(
    engine: Arc<Mutex<Engine>>,
    config: CronConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Cron received shutdown signal");
                    return;
                }
            }
        }

        ticks += 1;
        let now = unix_now();

        let mut engine = engine.lock().unwrap();
        engine.tick(now);

        if config.sweep_every > 0 && ticks % config.sweep_every == 0 {
            let swept = engine.sweep_expired();
            if swept > 0 {
                debug!(
                    swept = swept,
                    items_remaining = engine.len(),
                    "Expired items swept"
                );
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
