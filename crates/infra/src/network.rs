//! Connectivity state shared between platform glue and the upload queue.

use moodlog_core::NetworkMonitor;
use tokio::sync::watch;
use tracing::info;

/// Process-wide connectivity flag.
///
/// Platform glue calls [`ConnectivityHandle::set_connected`] whenever the OS
/// reports a reachability change; the queue engine observes the flag through
/// the [`NetworkMonitor`] port.
#[derive(Clone)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Create a handle with the given initial state.
    pub fn new(initially_connected: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_connected);
        Self { tx }
    }

    /// Record a connectivity change reported by the platform.
    pub fn set_connected(&self, connected: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == connected {
                return false;
            }
            *state = connected;
            true
        });
        if changed {
            info!(connected, "connectivity changed");
        }
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new(false)
    }
}

impl NetworkMonitor for ConnectivityHandle {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reflects_the_latest_reported_state() {
        let handle = ConnectivityHandle::new(false);
        assert!(!handle.is_connected());

        handle.set_connected(true);
        assert!(handle.is_connected());

        handle.set_connected(false);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let handle = ConnectivityHandle::new(false);
        let mut rx = handle.subscribe();

        handle.set_connected(true);
        rx.changed().await.expect("sender alive");
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn redundant_updates_do_not_wake_subscribers() {
        let handle = ConnectivityHandle::new(true);
        let mut rx = handle.subscribe();
        rx.mark_unchanged();

        handle.set_connected(true);
        assert!(!rx.has_changed().expect("sender alive"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let handle = ConnectivityHandle::new(false);
        let other = handle.clone();

        other.set_connected(true);
        assert!(handle.is_connected());
    }
}
