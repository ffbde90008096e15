use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Server link connectivity as seen by the engine.
///
/// The engine only reads the flag and asks for a connection; the link
/// supervisor owns the retries.
#[derive(Debug, Default)]
pub struct LinkState {
    connected: AtomicBool,
    requested: Notify,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            log::info!("link: server link {}", if connected { "up" } else { "down" });
        }
    }

    pub fn request_connect(&self) {
        self.requested.notify_one();
    }

    /// Resolves once a connection has been requested.
    pub async fn connect_requested(&self) {
        self.requested.notified().await;
    }
}
