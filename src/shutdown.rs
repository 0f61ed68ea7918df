//! Cooperative cancellation shared by every pipeline task.
//!
//! Triggering drops the only sender, so every clone's receiver observes a disconnect. Loops
//! can either poll [`Shutdown::is_triggered`] or include [`Shutdown::receiver`] in a
//! `crossbeam_channel::select!`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Signal every holder. Idempotent.
    pub fn trigger(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            log::info!("shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`. Returns true if shutdown was triggered meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Becomes ready (with a disconnect error) once shutdown is triggered.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
