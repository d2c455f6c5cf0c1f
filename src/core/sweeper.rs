//! Supervised periodic background task.
//!
//! Runs a pass closure on its own thread every `interval`, passing the pass
//! number (1-based). Owned by the artifact cache and stopped deterministically
//! on `stop()` or drop; no pass runs after `stop()` returns.

use crossbeam_channel::{Sender, bounded, select, tick};
use log::{info, trace, warn};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

pub struct Sweeper {
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn<F>(name: &str, interval: Duration, mut pass: F) -> std::io::Result<Self>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_name = name.to_string();

        let handle = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            info!("{} started (every {:?})", thread_name, interval);
            let ticker = tick(interval);
            let mut pass_no: u64 = 0;
            loop {
                select! {
                    recv(ticker) -> _ => {
                        pass_no += 1;
                        trace!("{} pass {}", thread_name, pass_no);
                        if panic::catch_unwind(AssertUnwindSafe(|| pass(pass_no))).is_err() {
                            warn!("{} pass {} panicked", thread_name, pass_no);
                        }
                    }
                    // explicit stop or owner dropped
                    recv(stop_rx) -> _ => break,
                }
            }
            info!("{} stopped", thread_name);
        })?;

        Ok(Self { stop_tx: Some(stop_tx), handle: Some(handle) })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for the current pass to finish.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
