//! Background Syncer
//!
//! Periodically writes back dirty containers so a crash loses at most one
//! interval of index updates.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use super::DbPool;

/// Handle to the sync thread; stops it on drop
pub struct Syncer {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Syncer {
    /// Start syncing `pool` every `interval`
    pub fn spawn(pool: DbPool, interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("ldbm-syncer".into())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match pool.sync_dirty() {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(containers = n, "periodic sync"),
                        Err(e) => tracing::warn!(error = %e, "periodic sync failed"),
                    },
                    // Explicit shutdown or the owner went away
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("syncer thread panicked");
            }
        }
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        self.stop();
    }
}
