use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Outbound channels of every replica that finished a full resync.
#[derive(Default)]
pub struct CommandPropagator {
    replicas: Mutex<Vec<UnboundedSender<Bytes>>>,
}

impl CommandPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_replica(&self, sender: UnboundedSender<Bytes>) {
        let mut replicas = self.replicas.lock();
        replicas.push(sender);
        debug!(replicas = replicas.len(), "replica registered");
    }

    /// Sends `command` to every replica in registration order.
    /// Channels whose connection is gone are dropped. Returns how many got it.
    pub fn propagate(&self, command: &Bytes) -> usize {
        let mut replicas = self.replicas.lock();
        let before = replicas.len();
        replicas.retain(|sender| sender.send(command.clone()).is_ok());
        if replicas.len() < before {
            warn!(dropped = before - replicas.len(), "dropped disconnected replicas");
        }
        replicas.len()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().len()
    }
}
