//! Background compaction thread
//!
//! Wakes on a timer or when the engine reports a rotation, and runs the
//! supplied check. The check decides whether the trigger is met.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender, TrySendError};

use crate::error::Result;

/// Handle to the background compaction thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct CompactionWorker {
    wake: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    /// Start the thread; `check` runs on every wake-up
    pub fn spawn<F>(interval: Duration, check: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        // One pending wake-up is enough; extra notifications coalesce
        let (wake, rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("emberkv-compaction".to_string())
            .spawn(move || {
                tracing::debug!("Compaction worker started (interval {:?})", interval);
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Timeout) => check(),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Compaction worker stopped");
            })?;

        Ok(Self {
            wake: Some(wake),
            handle: Some(handle),
        })
    }

    /// Ask for a check soon
    pub fn notify(&self) {
        if let Some(wake) = &self.wake {
            match wake.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    tracing::warn!("Compaction worker is gone; notification dropped")
                }
            }
        }
    }

    /// Stop the thread, waiting for a running cycle to finish
    pub fn shutdown(&mut self) {
        self.wake.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compaction worker panicked");
            }
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
