//! Registry of cancelable in-flight operations, keyed by correlation id.

use entcache_types::CorrelationId;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Receives the cancel reason, if the operation gets canceled.
pub type CancelReceiver = oneshot::Receiver<Option<String>>;

/// One cancel sender per outstanding correlation id.
#[derive(Debug, Default)]
pub struct InFlight {
    cancels: HashMap<CorrelationId, oneshot::Sender<Option<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation. Returns `None` if the id is already in
    /// flight.
    pub fn begin(&mut self, correlation_id: CorrelationId) -> Option<CancelReceiver> {
        if self.cancels.contains_key(&correlation_id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.cancels.insert(correlation_id, tx);
        Some(rx)
    }

    /// Signals cancellation. Returns `false` when nothing with that id is in
    /// flight any more, i.e. the cancel came too late.
    pub fn cancel(&mut self, correlation_id: &CorrelationId, reason: Option<String>) -> bool {
        match self.cancels.remove(correlation_id) {
            Some(tx) => tx.send(reason).is_ok(),
            None => false,
        }
    }

    /// Forgets a completed operation.
    pub fn finish(&mut self, correlation_id: &CorrelationId) {
        self.cancels.remove(correlation_id);
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.cancels.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.cancels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cancels.is_empty()
    }
}
