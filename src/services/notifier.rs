use std::sync::Arc;

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    CatalogChanged,
    JobsChanged,
}

/// Outbound "something changed" signal. The transport (IPC broadcast, UI refresh, ...) is
/// supplied by the host application.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: ChangeEvent);
}

pub type SharedNotifier = Arc<dyn ChangeNotifier>;

pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _event: ChangeEvent) {}
}

/// In-process fan-out to any number of subscribers. Sending with no subscriber is not an
/// error.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn notify(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }
}
