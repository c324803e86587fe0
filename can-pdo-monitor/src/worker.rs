//! Background activities and asynchronous error reporting
//!
//! Devices and the converter each run one named thread. A [`Worker`] owns the
//! thread together with its stop flag and a done-signal channel, so `stop` can
//! wait for a bounded grace period instead of joining blindly.

use crate::types::{MonitorError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named thread with a cooperative stop flag
pub(crate) struct Worker<T> {
    name: String,
    running: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn `body`, which must return soon after the flag it is given turns false
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) -> T + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        // Never sent on; the channel disconnects when the thread exits
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                body(&flag)
            })?;

        log::debug!("Spawned worker thread '{}'", name);

        Ok(Self {
            name: name.to_string(),
            running,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Ask the thread to stop and wait up to `grace` for it to finish
    ///
    /// On timeout the worker is left in place so the caller may retry;
    /// the thread is neither joined nor detached.
    pub(crate) fn stop(&mut self, grace: Duration) -> Result<T> {
        self.running.store(false, Ordering::SeqCst);

        match self.done_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                log::error!("Worker '{}' did not stop within {:?}", self.name, grace);
                return Err(MonitorError::ThreadClose(self.name.clone()));
            }
        }

        let handle = self
            .handle
            .take()
            .ok_or_else(|| MonitorError::ThreadPanicked(self.name.clone()))?;

        let output = handle
            .join()
            .map_err(|_| MonitorError::ThreadPanicked(self.name.clone()))?;

        log::debug!("Worker '{}' stopped", self.name);
        Ok(output)
    }

    /// True once stop has been requested
    pub(crate) fn stop_requested(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

/// Channel for errors raised inside a running activity
///
/// Reporting never blocks: when the channel is full the error is still
/// logged but only counted.
#[derive(Clone)]
pub struct ErrorReporter {
    source: &'static str,
    tx: Sender<MonitorError>,
    rx: Receiver<MonitorError>,
    dropped: Arc<AtomicU64>,
}

impl ErrorReporter {
    pub fn new(source: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            source,
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an error without interrupting the caller
    pub fn report(&self, error: MonitorError) {
        log::warn!("{}: {}", self.source, error);
        if let Err(TrySendError::Full(_)) = self.tx.try_send(error) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every error reported so far
    pub fn drain(&self) -> Vec<MonitorError> {
        self.rx.try_iter().collect()
    }

    /// Errors that were logged but did not fit in the channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
