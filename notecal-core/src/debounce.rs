//! Per-key trailing debounce.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

struct Pending<K, V> {
    generation: u64,
    entries: HashMap<K, (u64, V)>,
}

/// Coalesces values pushed for the same key and emits the merged value on
/// `output` once no new value has arrived for `window`.
///
/// Each push restarts the key's timer. Keys settle independently; the output
/// channel is the single ordered fan-in point for all of them.
pub struct Debouncer<K, V> {
    window: Duration,
    merge: fn(V, V) -> V,
    pending: Arc<Mutex<Pending<K, V>>>,
    output: mpsc::UnboundedSender<(K, V)>,
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// `merge(previous, incoming)` combines a value still waiting with a new one.
    pub fn new(
        window: Duration,
        merge: fn(V, V) -> V,
    ) -> (Self, mpsc::UnboundedReceiver<(K, V)>) {
        let (output, rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer {
            window,
            merge,
            pending: Arc::new(Mutex::new(Pending {
                generation: 0,
                entries: HashMap::new(),
            })),
            output,
        };
        (debouncer, rx)
    }

    /// Queue `value` for `key`, restarting that key's window.
    pub fn push(&self, key: K, value: V) {
        let generation = {
            let mut pending = self.pending.lock();
            pending.generation += 1;
            let generation = pending.generation;

            let merged = match pending.entries.remove(&key) {
                Some((_, previous)) => (self.merge)(previous, value),
                None => value,
            };
            pending.entries.insert(key.clone(), (generation, merged));
            generation
        };

        let pending = Arc::clone(&self.pending);
        let output = self.output.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let settled = {
                let mut pending = pending.lock();
                match pending.entries.get(&key) {
                    Some((current, _)) if *current == generation => pending.entries.remove(&key),
                    _ => None,
                }
            };

            if let Some((_, value)) = settled {
                // Receiver gone means the pipeline stopped
                let _ = output.send((key, value));
            }
        });
    }

    /// Drop the pending value for `key` without emitting it.
    pub fn cancel(&self, key: &K) {
        self.pending.lock().entries.remove(key);
    }

    /// Drop every pending value without emitting it.
    pub fn cancel_all(&self) {
        self.pending.lock().entries.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().entries.len()
    }
}
