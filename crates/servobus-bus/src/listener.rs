//! Background receive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::controller::BusController;
use crate::error::{BusResult, TransportError};
use crate::events::Severity;

/// Handle to a thread running passive receive cycles.
///
/// The stop flag is checked after every frame or timeout, so stopping takes
/// at most one byte timeout. Dropping the handle raises the flag without
/// waiting; [`stop`](Self::stop) also joins the thread.
pub struct Listener {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    pub(crate) fn spawn(controller: BusController) -> BusResult<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("servobus-listener".to_string())
            .spawn(move || run(controller, flag))
            .map_err(TransportError::Io)?;

        Ok(Listener {
            stop_flag,
            handle: Some(handle),
        })
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("listener thread panicked");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

fn run(controller: BusController, stop_flag: Arc<AtomicBool>) {
    tracing::debug!("listener started");
    while !stop_flag.load(Ordering::Relaxed) {
        if let Err(e) = controller.receive() {
            controller.report(Severity::Error, format!("listener stopped: {}", e));
            return;
        }
    }
    tracing::debug!("listener stopped");
}
