//! Coalesced refresh notifications for calendar consumers.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::constants::NOTIFY_DEBOUNCE;
use crate::debounce::Debouncer;

/// Broadcasts "something changed" to subscribers, with a trailing debounce so
/// bursts of instance creation produce one refresh.
pub struct ChangeNotifier {
    debouncer: Debouncer<(), ()>,
    sender: broadcast::Sender<()>,
    forwarder: JoinHandle<()>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (debouncer, settled) = Debouncer::new(NOTIFY_DEBOUNCE, |_, _| ());
        let (sender, _) = broadcast::channel(16);
        let forwarder = tokio::spawn(forward(settled, sender.clone()));

        ChangeNotifier {
            debouncer,
            sender,
            forwarder,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Schedule a refresh after the debounce window.
    pub fn notify(&self) {
        self.debouncer.push((), ());
    }

    /// Refresh subscribers now, absorbing any scheduled refresh.
    pub fn flush(&self) {
        self.debouncer.cancel_all();
        // No subscribers is not an error
        let _ = self.sender.send(());
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.debouncer.cancel_all();
        self.forwarder.abort();
    }
}

async fn forward(mut settled: mpsc::UnboundedReceiver<((), ())>, sender: broadcast::Sender<()>) {
    while settled.recv().await.is_some() {
        let _ = sender.send(());
    }
}
