//! Background Expiry Sweeper
//!
//! Reads never delete: a `get` on a stale item reports it as expired and
//! leaves it in place. Without an active sweeper, items that are never
//! written again would stay in memory forever.
//!
//! ## Design
//!
//! The sweeper runs on its own OS thread driving a current-thread Tokio
//! runtime, so it works whether or not the host process runs Tokio:
//!
//! 1. Waits for the next tick of a fixed interval, or for the stop signal
//! 2. Calls [`Sweep::sweep_expired`] on its target
//! 3. Logs how many items were removed
//!
//! The stop signal is a `watch` channel observed by the wait step itself, so
//! the task never polls a flag. Once stopped it never restarts.

use std::io;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Something that can purge its own expired entries.
pub trait Sweep: Send + Sync + 'static {
    /// Removes every expired entry and returns how many were removed.
    fn sweep_expired(&self) -> u64;
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps
    pub interval: Duration,

    /// Name of the sweeper thread, also used in log fields
    pub name: String,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            name: "expiry-sweeper".to_string(),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    name: String,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread cannot be created.
    pub fn start<T: Sweep>(target: Arc<T>, config: ExpiryConfig) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<io::Result<()>>(1);

        let name = config.name.clone();
        thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                // Built on the sweeper thread so it is also dropped there
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                runtime.block_on(sweeper_loop(target, config, shutdown_rx));
            })?;

        ready_rx
            .recv()
            .map_err(|_| io::Error::other("sweeper thread exited before starting"))??;

        info!(sweeper = %name, "Background expiry sweeper started");

        Ok(Self { shutdown_tx, name })
    }

    /// Stops the expiry sweeper.
    ///
    /// Safe to call more than once. This is called automatically when the
    /// handle is dropped.
    pub fn stop(&self) {
        let already_stopped = self.shutdown_tx.send_replace(true);
        if !already_stopped {
            info!(sweeper = %self.name, "Background expiry sweeper stopped");
        }
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop<T: Sweep>(
    target: Arc<T>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    ticker.tick().await;

    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!(sweeper = %config.name, "Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let removed = target.sweep_expired();

        if removed > 0 {
            debug!(sweeper = %config.name, removed, "Expired items cleaned up");
        } else {
            trace!(sweeper = %config.name, "Sweep found nothing to remove");
        }
    }
}
