//! Background sweep threads.
//!
//! Caches and the rate limiter expire state lazily on access. A sweeper
//! additionally purges idle state on a fixed interval so memory stays
//! bounded when keys stop being touched.

use crate::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Handle to a running sweeper thread.
///
/// Dropping the handle stops the thread and joins it.
pub struct SweepHandle {
    name: String,
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Returns the sweeper thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the sweeper and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns a named thread that calls `sweep` on `target` every `interval`.
///
/// The thread holds only a weak reference and exits once the target is
/// dropped or the handle is stopped.
pub(crate) fn spawn_sweeper<T>(
    name: &str,
    interval: Duration,
    target: Weak<T>,
    sweep: fn(&T),
) -> Result<SweepHandle>
where
    T: Send + Sync + 'static,
{
    let stop = Arc::new((Mutex::new(false), Condvar::new()));
    let thread_stop = Arc::clone(&stop);
    let thread_name = name.to_string();

    let thread = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let (lock, cvar) = &*thread_stop;
            loop {
                let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let (stopped, _) = cvar
                    .wait_timeout_while(guard, interval, |stopped| !*stopped)
                    .unwrap_or_else(PoisonError::into_inner);
                if *stopped {
                    break;
                }
                drop(stopped);

                let Some(target) = target.upgrade() else {
                    break;
                };
                sweep(&target);
            }
            debug!(thread = %thread_name, "Sweeper stopped");
        })
        .map_err(|e| Error::OperationFailed {
            operation: "spawn_sweeper".to_string(),
            cause: e.to_string(),
        })?;

    Ok(SweepHandle {
        name: name.to_string(),
        stop,
        thread: Some(thread),
    })
}
