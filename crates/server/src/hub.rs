use shared::protocol::ServerReply;
use tokio::sync::broadcast;
use tracing::debug;

/// Fan-out to every connected observer. Built on a broadcast channel so
/// one slow or closed observer can never block delivery to the rest:
/// each connection drains its own receiver, and a receiver that lags or
/// closes only ends that connection's forwarder.
#[derive(Clone)]
pub struct Hub {
    sender: broadcast::Sender<ServerReply>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerReply> {
        self.sender.subscribe()
    }

    pub fn broadcast(&self, reply: ServerReply) {
        // send only errors when nobody is listening, which is fine
        let delivered = self.sender.send(reply).unwrap_or(0);
        debug!(observers = delivered, "broadcast");
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
