//! Background reaper thread (`spec.md` §4.3, §6 `CheckConnectionPoolPeriod`/
//! `TimeUnit`): periodically trims the idle port pool back down to capacity
//! and tells the server it may forget the `SlaveID`s of the ports that got
//! closed.
//!
//! Grounded on `cmap::background::start_background_thread`: a `Weak`
//! reference to the owning `DataSourceInner` keeps the reaper from pinning
//! the `DataSource` alive, and ticks at `TimeUnit` granularity so an abort
//! requested by `DataSource::close` is noticed promptly even though the
//! actual pool check only runs every `CheckConnectionPoolPeriod`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::datasource::DataSourceInner;

/// Handle to a running reaper thread. Dropping it does not stop the thread
/// (the thread also exits on its own once the `DataSourceInner` it watches
/// is dropped); call [`Reaper::stop`] for a prompt, synchronous shutdown.
pub(crate) struct Reaper {
    abort: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub(crate) fn spawn(target: Weak<DataSourceInner>, reaper_ticks: u32, time_unit: std::time::Duration) -> Self {
        let abort = Arc::new(AtomicBool::new(false));
        let thread_abort = abort.clone();

        let handle = std::thread::spawn(move || {
            let ticks_per_check = reaper_ticks.max(1);
            let mut tick = 0u32;

            loop {
                std::thread::sleep(time_unit);

                if thread_abort.load(Ordering::SeqCst) {
                    return;
                }

                tick += 1;
                if tick < ticks_per_check {
                    continue;
                }
                tick = 0;

                match target.upgrade() {
                    Some(inner) => inner.reap_once(),
                    None => return,
                }
            }
        });

        Self {
            abort,
            handle: Some(handle),
        }
    }

    /// Signals the reaper to stop and waits for the thread to exit.
    pub(crate) fn stop(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}
