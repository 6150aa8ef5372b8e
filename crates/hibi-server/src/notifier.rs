//! In-process change fan-out.
//!
//! The [`ChangeNotifier`] is a registry of listeners. [`ChangeNotifier::emit`]
//! calls every listener registered at that moment, synchronously, with a
//! [`ChangeSignal`] naming the changed entity kind. There is no queue and no
//! replay: a listener registered after an emit never sees it.
//!
//! Listeners report whether they are still alive; dead ones are pruned on the
//! next emit. [`Unsubscribe`] guards remove their listener when dropped, which
//! is how an event stream cleans up when its HTTP body goes away.
//!
//! # Example
//!
//! ```ignore
//! let notifier = ChangeNotifier::new();
//! let mut signals = notifier.listen();
//!
//! notifier.emit(EntityKind::Todos);
//! assert_eq!(signals.recv().await.unwrap().entity, "todos");
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use hibi_types::{ChangeSignal, EntityKind};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A registered callback. Returns `false` once it can no longer deliver.
type Listener = Arc<dyn Fn(&ChangeSignal) -> bool + Send + Sync>;

struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }
}

/// Process-wide change broadcaster. Cheap to clone; clones share listeners.
#[derive(Clone)]
pub struct ChangeNotifier {
    registry: Arc<Registry>,
}

static GLOBAL: OnceLock<ChangeNotifier> = OnceLock::new();

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The shared instance used by the server binary.
    pub fn global() -> &'static ChangeNotifier {
        GLOBAL.get_or_init(ChangeNotifier::new)
    }

    /// Register `listener`. It stays registered until the returned guard is
    /// dropped or the listener returns `false`.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&ChangeSignal) -> bool + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.lock().insert(id, Arc::new(listener));
        tracing::debug!(listener = id, "change listener registered");
        Unsubscribe { registry: Arc::downgrade(&self.registry), id }
    }

    /// Register a channel-backed listener and return its receiving end.
    pub fn listen(&self) -> SignalStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.subscribe(move |signal| tx.send(signal.clone()).is_ok());
        SignalStream { rx, _guard: guard }
    }

    /// Deliver a signal for `kind` to every current listener.
    ///
    /// Listeners run outside the registry lock, so a listener may subscribe
    /// or unsubscribe without deadlocking. Returns the number delivered.
    pub fn emit(&self, kind: EntityKind) -> usize {
        let signal = ChangeSignal::new(kind);
        let snapshot: Vec<(u64, Listener)> = self
            .registry
            .listeners
            .lock()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, listener) in snapshot {
            if listener(&signal) {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut listeners = self.registry.listeners.lock();
            for id in &dead {
                listeners.remove(id);
            }
            tracing::debug!(pruned = dead.len(), "pruned closed change listeners");
        }

        tracing::debug!(entity = %kind, delivered, "change emitted");
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Removes its listener on drop.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct Unsubscribe {
    registry: Weak<Registry>,
    id: u64,
}

impl Unsubscribe {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                tracing::debug!(listener = self.id, "change listener removed");
            }
        }
    }
}

/// Signals delivered to one [`ChangeNotifier::listen`] registration.
///
/// Dropping the stream unregisters it.
pub struct SignalStream {
    rx: mpsc::UnboundedReceiver<ChangeSignal>,
    _guard: Unsubscribe,
}

impl SignalStream {
    pub async fn recv(&mut self) -> Option<ChangeSignal> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeSignal> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SignalStream {
    type Item = ChangeSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_current_listeners() {
        let notifier = ChangeNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _guard = notifier.subscribe(move |signal| {
            assert_eq!(signal.entity, "people");
            h.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert_eq!(notifier.emit(EntityKind::People), 1);
        assert_eq!(notifier.emit(EntityKind::People), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_replay_for_late_listeners() {
        let notifier = ChangeNotifier::new();
        notifier.emit(EntityKind::Todos);

        let mut stream = notifier.listen();
        assert!(stream.try_recv().is_none());

        notifier.emit(EntityKind::Labels);
        assert_eq!(stream.try_recv().unwrap().entity, "labels");
    }

    #[test]
    fn test_drop_guard_unregisters() {
        let notifier = ChangeNotifier::new();
        let guard = notifier.subscribe(|_| true);
        let stream = notifier.listen();
        assert_eq!(notifier.listener_count(), 2);

        guard.unsubscribe();
        assert_eq!(notifier.listener_count(), 1);
        drop(stream);
        assert_eq!(notifier.listener_count(), 0);
        assert_eq!(notifier.emit(EntityKind::Todos), 0);
    }

    #[test]
    fn test_dead_listeners_pruned_on_emit() {
        let notifier = ChangeNotifier::new();
        let _alive = notifier.subscribe(|_| true);
        let _dead = notifier.subscribe(|_| false);
        assert_eq!(notifier.listener_count(), 2);

        assert_eq!(notifier.emit(EntityKind::NotebookNotes), 1);
        assert_eq!(notifier.listener_count(), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_others_during_emit() {
        let notifier = ChangeNotifier::new();
        let victim = Arc::new(Mutex::new(Some(notifier.subscribe(|_| true))));
        let v = Arc::clone(&victim);
        let _killer = notifier.subscribe(move |_| {
            v.lock().take();
            true
        });

        notifier.emit(EntityKind::Todos);
        assert_eq!(notifier.listener_count(), 1);
    }

    #[test]
    fn test_global_is_shared() {
        let a = ChangeNotifier::global();
        let b = ChangeNotifier::global();
        assert!(Arc::ptr_eq(&a.registry, &b.registry));
    }

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        use futures::StreamExt;

        let notifier = ChangeNotifier::new();
        let mut stream = notifier.listen();
        notifier.emit(EntityKind::Todos);
        notifier.emit(EntityKind::People);

        assert_eq!(stream.next().await.unwrap().entity, "todos");
        assert_eq!(stream.recv().await.unwrap().entity, "people");
    }
}
