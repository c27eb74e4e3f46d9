//! Debounced flush scheduling.
//!
//! A single long-lived worker owns the export path: bursts of
//! [`FlushManager::mark_dirty`] calls coalesce into at most one exporter
//! invocation per debounce window, a sticky full-export flag survives
//! interleaved incremental requests, and shutdown guarantees a final
//! flush. No two flushes ever execute concurrently.

use crate::error::Result;
use crate::sync::exporter::{ExportReport, Exporter, FlushMode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Consecutive failures before a prominent warning is surfaced.
const FAILURE_WARN_THRESHOLD: u32 = 3;

/// Debounce and coalescing windows for the flush worker.
#[derive(Debug, Clone)]
pub struct FlushOptions {
    /// Quiet period after the last request before the worker fires.
    pub debounce: Duration,
    /// Upper bound on coalescing: the worker fires this long after the
    /// first request of a burst even under sustained writes.
    pub max_coalesce: Duration,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_coalesce: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct FlushState {
    dirty: bool,
    /// Sticky until the next successful full export.
    needs_full: bool,
    /// Bumped on every full request; lets the worker clear the sticky
    /// flag only when no newer full request arrived mid-flush.
    full_epoch: u64,
    shutting_down: bool,
    first_request: Option<Instant>,
    last_request: Option<Instant>,
}

struct Shared {
    state: Mutex<FlushState>,
    signal: Condvar,
    /// Serializes the exporter between the worker and `flush_now`.
    flush_serial: Mutex<()>,
    exporter: Arc<Exporter>,
    options: FlushOptions,
    consecutive_failures: AtomicU32,
}

fn lock_state(shared: &Shared) -> MutexGuard<'_, FlushState> {
    shared.state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event-driven, debounced, serialized writer driving exports.
pub struct FlushManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlushManager {
    /// Start the worker thread over an exporter.
    #[must_use]
    pub fn start(exporter: Arc<Exporter>, options: FlushOptions) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(FlushState::default()),
            signal: Condvar::new(),
            flush_serial: Mutex::new(()),
            exporter,
            options,
            consecutive_failures: AtomicU32::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = match thread::Builder::new()
            .name("braid-flush".to_string())
            .spawn(move || worker_loop(&worker_shared))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start flush worker; automatic flushes disabled");
                None
            }
        };

        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// Request a flush. Cheap and non-blocking; called by any mutator.
    ///
    /// `full` requests a full re-export and is sticky until one succeeds.
    /// A no-op once [`FlushManager::shutdown`] has begun.
    pub fn mark_dirty(&self, full: bool) {
        let mut state = lock_state(&self.shared);
        if state.shutting_down {
            return;
        }
        state.dirty = true;
        if full {
            state.needs_full = true;
            state.full_epoch += 1;
        }
        let now = Instant::now();
        if state.first_request.is_none() {
            state.first_request = Some(now);
        }
        state.last_request = Some(now);
        drop(state);
        self.shared.signal.notify_all();
    }

    /// Run a flush synchronously, bypassing the debounce window.
    ///
    /// Serialized against the worker; at no point do two flushes overlap.
    ///
    /// # Errors
    ///
    /// Propagates the exporter's failure. The dirty set is untouched so a
    /// later flush retries the same identifiers.
    pub fn flush_now(&self) -> Result<ExportReport> {
        let (full, epoch) = {
            let mut state = lock_state(&self.shared);
            state.dirty = false;
            state.first_request = None;
            state.last_request = None;
            (state.needs_full, state.full_epoch)
        };
        self.run_flush(full, epoch)
    }

    /// Consecutive flush failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.shared.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Block until any in-flight flush completes and a final flush has run
    /// if state is dirty. After return, `mark_dirty` is a no-op.
    pub fn shutdown(&self) {
        {
            let mut state = lock_state(&self.shared);
            state.shutting_down = true;
        }
        self.shared.signal.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run_flush(&self, full: bool, epoch: u64) -> Result<ExportReport> {
        let _serial = self
            .shared
            .flush_serial
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let result = if full {
            self.shared.exporter.flush_full()
        } else {
            self.shared.exporter.flush_incremental()
        };
        settle_flush_result(&self.shared, full, epoch, &result);
        result
    }
}

impl Drop for FlushManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Post-flush bookkeeping shared by the worker and `flush_now`: clear the
/// sticky full flag only on success with no newer full request, and track
/// the consecutive-failure count.
fn settle_flush_result(
    shared: &Shared,
    was_full: bool,
    epoch: u64,
    result: &Result<ExportReport>,
) {
    match result {
        Ok(report) => {
            shared.consecutive_failures.store(0, Ordering::Relaxed);
            let mut state = lock_state(shared);
            let escalated = report.mode == FlushMode::Full;
            if (was_full || escalated) && state.full_epoch == epoch {
                state.needs_full = false;
            }
        }
        Err(e) if e.is_closed() => {
            // Storage shut down underneath us; nothing to export anymore.
            tracing::debug!("Flush skipped: storage is closed");
        }
        Err(e) => {
            let failures = shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::error!(error = %e, failures, "Flush failed; dirty issues retained");
            if failures >= FAILURE_WARN_THRESHOLD {
                eprintln!(
                    "warning: {failures} consecutive flush failures; \
                     run 'braid sync --flush' to export manually ({e})"
                );
            }
        }
    }
}

#[allow(clippy::significant_drop_in_scrutinee)]
fn worker_loop(shared: &Shared) {
    loop {
        let mut state = lock_state(shared);

        // Wait for work or shutdown. The debounce timer restarts on each
        // request (tail-collapsed) but never extends past the coalescing
        // bound measured from the burst's first request.
        loop {
            if state.shutting_down {
                break;
            }
            if state.dirty {
                let now = Instant::now();
                let fire_at = fire_deadline(&state, &shared.options);
                if now >= fire_at {
                    break;
                }
                let (next, _timeout) = shared
                    .signal
                    .wait_timeout(state, fire_at - now)
                    .unwrap_or_else(PoisonError::into_inner);
                state = next;
            } else {
                state = shared
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if !state.dirty {
            // Shutdown with nothing pending.
            return;
        }

        // Snapshot the flags, release the lock, run the flush.
        let shutting_down = state.shutting_down;
        let full = state.needs_full;
        let epoch = state.full_epoch;
        state.dirty = false;
        state.first_request = None;
        state.last_request = None;
        drop(state);

        let result = {
            let _serial = shared
                .flush_serial
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if full {
                shared.exporter.flush_full()
            } else {
                shared.exporter.flush_incremental()
            }
        };
        let failed = matches!(&result, Err(e) if !e.is_closed());
        settle_flush_result(shared, full, epoch, &result);

        if shutting_down {
            // Final flush has run (or failed); the dirty set in the
            // database still holds anything unexported.
            return;
        }

        if failed {
            // Re-arm so the next window retries the same identifiers.
            let mut state = lock_state(shared);
            state.dirty = true;
            let now = Instant::now();
            state.first_request = Some(now);
            state.last_request = Some(now);
        }
    }
}

fn fire_deadline(state: &FlushState, options: &FlushOptions) -> Instant {
    let now = Instant::now();
    let debounce_at = state
        .last_request
        .map_or(now, |last| last + options.debounce);
    let coalesce_at = state
        .first_request
        .map_or(now, |first| first + options.max_coalesce);
    debounce_at.min(coalesce_at)
}
