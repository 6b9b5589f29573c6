// SPDX-License-Identifier: GPL-3.0-only
//! Consumer thread lifecycle
//!
//! Runs the pull side of a capture session on its own thread: an init step
//! that builds and opens whatever the loop needs, then one step per frame
//! until the step asks to stop, the stop flag is raised, or a session-fatal
//! error occurs. Expected polling outcomes (`Timeout`, `AlreadyConsumed`) and
//! per-frame failures keep the loop running.

use crate::errors::{CaptureError, CaptureResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// What the loop should do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Summary returned when the consumer thread ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Steps that returned `Ok`
    pub steps: u64,
    /// Steps that ended in a timeout or an already-consumed frame
    pub idle: u64,
    /// Steps that failed with a recoverable error
    pub failures: u64,
}

/// Handle to a running consumer thread
pub struct ConsumerLoop {
    handle: Option<JoinHandle<CaptureResult<LoopReport>>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl ConsumerLoop {
    /// Spawn the consumer thread
    ///
    /// `init` runs on the new thread; its error ends the thread and is
    /// returned from [`ConsumerLoop::join`].
    pub fn start<S, I, F>(name: &str, init: I, mut step: F) -> Self
    where
        S: 'static,
        I: FnOnce() -> CaptureResult<S> + Send + 'static,
        F: FnMut(&mut S) -> CaptureResult<LoopAction> + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting consumer loop");

        let handle = thread::spawn(move || {
            let mut state = match init() {
                Ok(state) => state,
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Consumer initialization failed");
                    return Err(e);
                }
            };

            let mut report = LoopReport::default();
            while !stop.load(Ordering::SeqCst) {
                match step(&mut state) {
                    Ok(LoopAction::Continue) => report.steps += 1,
                    Ok(LoopAction::Stop) => {
                        report.steps += 1;
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                    Err(e) if e.is_expected() => {
                        report.idle += 1;
                        trace!(name = %thread_name, outcome = %e, "No new frame");
                    }
                    Err(CaptureError::Closed) => {
                        debug!(name = %thread_name, "Session closed");
                        break;
                    }
                    Err(e) if e.is_fatal() => {
                        error!(name = %thread_name, error = %e, "Consumer loop ending");
                        return Err(e);
                    }
                    Err(e) => {
                        report.failures += 1;
                        warn!(name = %thread_name, error = %e, "Frame skipped");
                    }
                }
            }

            info!(
                name = %thread_name,
                steps = report.steps,
                idle = report.idle,
                failures = report.failures,
                "Consumer loop exiting"
            );
            // State (and any camera it owns) is dropped on this thread
            drop(state);
            Ok(report)
        });

        Self {
            handle: Some(handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Shared stop flag, e.g. for a signal handler
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Ask the loop to stop after the current step
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting consumer loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Request a stop and wait for the thread
    pub fn stop(&mut self) -> CaptureResult<LoopReport> {
        self.request_stop();
        self.join()
    }

    /// Wait for the thread to finish on its own
    ///
    /// Returns the loop's report, or the error that ended it. Joining twice
    /// returns an empty report.
    pub fn join(&mut self) -> CaptureResult<LoopReport> {
        let Some(handle) = self.handle.take() else {
            return Ok(LoopReport::default());
        };

        match handle.join() {
            Ok(result) => result,
            Err(e) => {
                warn!(name = %self.name, "Consumer thread panicked: {:?}", e);
                Err(CaptureError::InvalidState(format!(
                    "consumer thread '{}' panicked",
                    self.name
                )))
            }
        }
    }
}

impl Drop for ConsumerLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(name = %self.name, "ConsumerLoop dropped, stopping");
            let _ = self.stop();
        }
    }
}
