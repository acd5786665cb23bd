//! Periodic worker thread for the notification engine.
//!
//! # Invariants
//! - Cycles never overlap: the next tick is only considered after a cycle returns.
//! - Ticks missed while a cycle overran are dropped, not replayed.
//! - `EngineHandle::stop` returns only after the in-flight cycle (if any) finished.

use super::NotificationEngine;
use log::{error, info};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WORKER_THREAD_NAME: &str = "notification-engine";

impl NotificationEngine {
    /// Starts the periodic loop on a dedicated thread.
    ///
    /// The first cycle runs one `tick_interval` after start.
    ///
    /// # Errors
    /// - `InvalidInput` when `tick_interval` is zero or too large to schedule.
    /// - Thread spawn failures from the OS.
    pub fn start(self: Arc<Self>) -> io::Result<EngineHandle> {
        let tick = self.config.tick_interval;
        if tick.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tick_interval must be greater than zero",
            ));
        }
        let first_tick = Instant::now().checked_add(tick).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("tick_interval of {}s cannot be scheduled", tick.as_secs()),
            )
        })?;

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let cycles = Arc::new(AtomicU64::new(0));
        let worker_cycles = Arc::clone(&cycles);

        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                info!(
                    "event=engine_start module=engine status=ok tick_ms={}",
                    tick.as_millis()
                );
                let mut next_tick = first_tick;
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.run_cycle();
                            worker_cycles.fetch_add(1, Ordering::SeqCst);
                            match following_tick(next_tick, tick, Instant::now()) {
                                Some(tick_at) => next_tick = tick_at,
                                None => {
                                    error!(
                                        "event=engine_tick module=engine status=error error_code=tick_overflow"
                                    );
                                    break;
                                }
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!(
                    "event=engine_stop module=engine status=ok cycles={}",
                    worker_cycles.load(Ordering::SeqCst)
                );
            })?;

        Ok(EngineHandle {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            cycles,
        })
    }
}

/// First tick strictly after `now`, dropping the ticks missed while a cycle overran.
fn following_tick(previous: Instant, tick: Duration, now: Instant) -> Option<Instant> {
    let mut next = previous.checked_add(tick)?;
    while next <= now {
        next = next.checked_add(tick)?;
    }
    Some(next)
}

/// Running engine. Dropping the handle stops the engine as well.
pub struct EngineHandle {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    cycles: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Number of cycles that ran to completion so far.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Signals cancellation and waits for the worker to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The worker may already be gone; a closed channel also stops it.
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("event=engine_stop module=engine status=error error_code=worker_panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
