//! Connectivity signal.
//!
//! The engine does not probe the network. The host reports reachability
//! through a [`Connectivity`] implementation; [`NetworkMonitor`] is a ready
//! made one backed by a `tokio::sync::watch` channel.

use tokio::sync::watch;

/// Source of online/offline state.
pub trait Connectivity: Send + Sync {
    /// Whether the remote store is currently reachable.
    fn is_online(&self) -> bool;

    /// A receiver that observes every change of the online flag.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Connectivity state pushed by the host.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Report the current state. Listeners are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
