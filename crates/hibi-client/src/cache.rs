//! Entity Cache.
//!
//! One [`EntityCache<T>`] per record type, keyed by [`CacheKey`]. Each entry
//! holds the last **confirmed** list (what the server said) plus a stack of
//! **optimistic layers**, one per in-flight mutation that touched the key.
//! Readers see the confirmed list with every layer applied in start order:
//!
//! ```text
//!   confirmed ──▶ layer(m1) ──▶ layer(m3) ──▶ visible
//! ```
//!
//! Settling a mutation removes its layer (and, on commit, first folds the
//! server's answer into the confirmed list) in one critical section across
//! every touched key. Because the other layers are re-run against the new
//! base, rolling back m1 leaves m3's edit in place no matter which of them
//! resolves first.
//!
//! A background refetch uses [`EntityCache::write_fetched`], which replaces
//! the confirmed list only; pending layers are re-applied on top. Each entry
//! counts the mutations folded into its confirmed list, and a fetch that read
//! before the latest one is dropped rather than written over it.
//!
//! # Staleness
//!
//! Nothing is evicted. Entries go stale when an invalidation names their
//! scope, and are refetched right away if a view has them mounted. A view that
//! (re)subscribes to an entry that is stale, missing, or older than the
//! max-age window triggers a refetch too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hibi_types::{CacheKey, CacheScope, EntityId, Label, Note, Person, Record, Task};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Identifies one mutation for the lifetime of its optimistic layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(pub u64);

impl std::fmt::Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A pure list transform. Runs against whatever the current value is.
pub type Transform<T> = Arc<dyn Fn(Vec<T>) -> Vec<T> + Send + Sync>;

/// Receiving end for keys that need a background refetch.
pub type RefetchRequests = mpsc::UnboundedReceiver<CacheKey>;

struct Layer<T> {
    mutation: MutationId,
    transform: Transform<T>,
}

struct Entry<T> {
    /// `None` until the first successful fetch.
    confirmed: Option<Vec<T>>,
    layers: Vec<Layer<T>>,
    visible: Option<Vec<T>>,
    fetched_at: Option<Instant>,
    stale: bool,
    mounts: usize,
    version: u64,
    /// Bumps whenever the confirmed list changes other than by a fetch.
    epoch: u64,
}

impl<T: Record> Entry<T> {
    fn new() -> Self {
        Self {
            confirmed: None,
            layers: Vec::new(),
            visible: None,
            fetched_at: None,
            stale: false,
            mounts: 0,
            version: 0,
            epoch: 0,
        }
    }

    fn recompute(&mut self) {
        self.visible = self.confirmed.as_ref().map(|base| {
            self.layers
                .iter()
                .fold(base.clone(), |acc, layer| (layer.transform)(acc))
        });
        self.version += 1;
    }

    fn needs_fetch(&self, max_age: Duration, now: Instant) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => self.stale || now.duration_since(at) >= max_age,
        }
    }
}

struct Inner<T> {
    entries: Mutex<HashMap<CacheKey, Entry<T>>>,
    generation: watch::Sender<u64>,
    refetch: mpsc::UnboundedSender<CacheKey>,
    max_age: Duration,
}

/// Typed, shareable cache handle. Clones share state.
pub struct EntityCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Record> EntityCache<T> {
    pub fn new(max_age: Duration, refetch: mpsc::UnboundedSender<CacheKey>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                generation,
                refetch,
                max_age,
            }),
        }
    }

    /// Current visible value, or `None` if the key was never loaded.
    pub fn read(&self, key: &CacheKey) -> Option<Vec<T>> {
        self.inner.entries.lock().get(key).and_then(|e| e.visible.clone())
    }

    /// Replace the confirmed value (a fresh server answer). Pending
    /// optimistic layers are re-applied on top.
    pub fn write(&self, key: &CacheKey, items: Vec<T>) {
        {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            Self::store(entry, items);
        }
        self.bump();
    }

    /// Take before reading `key` from the server; pass to
    /// [`write_fetched`](Self::write_fetched) with the answer.
    pub fn fetch_epoch(&self, key: &CacheKey) -> u64 {
        self.inner.entries.lock().get(key).map_or(0, |e| e.epoch)
    }

    /// [`write`](Self::write) for a read that began at `epoch`. If a mutation
    /// settled into `key` since, the answer may predate it: nothing is
    /// written and `false` comes back.
    pub fn write_fetched(&self, key: &CacheKey, items: Vec<T>, epoch: u64) -> bool {
        {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            if entry.epoch != epoch {
                return false;
            }
            Self::store(entry, items);
        }
        self.bump();
        true
    }

    fn store(entry: &mut Entry<T>, items: Vec<T>) {
        entry.confirmed = Some(items);
        entry.fetched_at = Some(Instant::now());
        entry.stale = false;
        entry.recompute();
    }

    /// Apply `f` to the confirmed value of a loaded key. Keys never loaded
    /// are left alone; their first fetch brings server truth. Returns whether
    /// the key was loaded.
    pub fn update(&self, key: &CacheKey, f: impl FnOnce(Vec<T>) -> Vec<T>) -> bool {
        let updated = {
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.confirmed.is_some() => {
                    let base = entry.confirmed.take().unwrap_or_default();
                    entry.confirmed = Some(f(base));
                    entry.epoch += 1;
                    entry.recompute();
                    true
                }
                _ => false,
            }
        };
        if updated {
            self.bump();
        }
        updated
    }

    /// Mount `key` for a view. Requests a refetch if the entry is missing,
    /// stale, or older than the max-age window.
    pub fn subscribe(&self, key: CacheKey) -> CacheView<T> {
        let (needs_fetch, version) = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.mounts += 1;
            (entry.needs_fetch(self.inner.max_age, Instant::now()), entry.version)
        };
        if needs_fetch {
            tracing::debug!(key = %key, "subscribe requests refetch");
            self.request_refetch(&key);
        }
        CacheView {
            cache: self.clone(),
            rx: self.inner.generation.subscribe(),
            seen: version,
            key,
        }
    }

    /// Mark every entry of `scope` stale and queue a refetch for each mounted
    /// one. Returns the number of refetches queued.
    pub fn invalidate_scope(&self, scope: CacheScope) -> usize {
        self.invalidate_where(|key| key.scope == scope)
    }

    /// Like [`invalidate_scope`](Self::invalidate_scope) but only for filtered
    /// keys not in `except`.
    pub fn invalidate_filtered(&self, scope: CacheScope, except: &[CacheKey]) -> usize {
        self.invalidate_where(|key| {
            key.scope == scope && !key.filter.is_unfiltered() && !except.contains(key)
        })
    }

    fn invalidate_where(&self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let mounted: Vec<CacheKey> = {
            let mut entries = self.inner.entries.lock();
            entries
                .iter_mut()
                .filter(|(key, _)| pred(key))
                .filter_map(|(key, entry)| {
                    entry.stale = true;
                    (entry.mounts > 0).then(|| key.clone())
                })
                .collect()
        };
        for key in &mounted {
            self.request_refetch(key);
        }
        mounted.len()
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.inner.entries.lock().get(key).is_some_and(|e| e.stale)
    }

    pub fn mount_count(&self, key: &CacheKey) -> usize {
        self.inner.entries.lock().get(key).map_or(0, |e| e.mounts)
    }

    /// Number of optimistic layers pending on `key`.
    pub fn pending_layers(&self, key: &CacheKey) -> usize {
        self.inner.entries.lock().get(key).map_or(0, |e| e.layers.len())
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    /// Per-entry change counter; bumps on every visible change.
    pub fn version(&self, key: &CacheKey) -> u64 {
        self.inner.entries.lock().get(key).map_or(0, |e| e.version)
    }

    /// Cache-wide change counter.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    /// First visible record with `id` across `keys`.
    pub fn find(&self, keys: &[CacheKey], id: &EntityId) -> Option<T> {
        let entries = self.inner.entries.lock();
        keys.iter()
            .filter_map(|k| entries.get(k))
            .filter_map(|e| e.visible.as_ref())
            .find_map(|items| items.iter().find(|r| r.id() == id).cloned())
    }

    /// Deep copy of the visible value of each key.
    pub fn snapshot(&self, keys: &[CacheKey]) -> HashMap<CacheKey, Option<Vec<T>>> {
        let entries = self.inner.entries.lock();
        keys.iter()
            .map(|k| (k.clone(), entries.get(k).and_then(|e| e.visible.clone())))
            .collect()
    }

    /// Push one optimistic layer per `(key, transform)` for `mutation`, all
    /// under one lock.
    pub(crate) fn apply_layers(&self, mutation: MutationId, steps: &[(CacheKey, Transform<T>)]) {
        if steps.is_empty() {
            return;
        }
        {
            let mut entries = self.inner.entries.lock();
            for (key, transform) in steps {
                let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
                entry.layers.push(Layer { mutation, transform: Arc::clone(transform) });
                entry.recompute();
            }
        }
        self.bump();
    }

    /// Drop `mutation`'s layers everywhere. With `reconcile`, first fold the
    /// authoritative answer into the confirmed value of each of `keys`.
    pub(crate) fn settle(
        &self,
        mutation: MutationId,
        keys: &[CacheKey],
        reconcile: Option<&dyn Fn(CacheScope, Vec<T>) -> Vec<T>>,
    ) {
        {
            let mut entries = self.inner.entries.lock();
            for (key, entry) in entries.iter_mut() {
                let had_layer = entry.layers.iter().any(|l| l.mutation == mutation);
                entry.layers.retain(|l| l.mutation != mutation);

                let mut reconciled = false;
                if let (Some(reconcile), true) = (reconcile, keys.contains(key)) {
                    if let Some(base) = entry.confirmed.take() {
                        entry.confirmed = Some(reconcile(key.scope, base));
                        entry.epoch += 1;
                        reconciled = true;
                    }
                }
                if had_layer || reconciled {
                    entry.recompute();
                }
            }
        }
        self.bump();
    }

    fn unmount(&self, key: &CacheKey) {
        if let Some(entry) = self.inner.entries.lock().get_mut(key) {
            entry.mounts = entry.mounts.saturating_sub(1);
        }
    }

    fn request_refetch(&self, key: &CacheKey) {
        if self.inner.refetch.send(key.clone()).is_err() {
            tracing::debug!(key = %key, "refetch queue closed");
        }
    }

    fn bump(&self) {
        self.inner.generation.send_modify(|g| *g += 1);
    }
}

/// A mounted key. Unmounts on drop.
pub struct CacheView<T: Record> {
    cache: EntityCache<T>,
    key: CacheKey,
    rx: watch::Receiver<u64>,
    seen: u64,
}

impl<T: Record> CacheView<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn read(&self) -> Option<Vec<T>> {
        self.cache.read(&self.key)
    }

    /// Wait until this key's visible value changes.
    pub async fn changed(&mut self) {
        loop {
            let version = self.cache.version(&self.key);
            if version != self.seen {
                self.seen = version;
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl<T: Record> Drop for CacheView<T> {
    fn drop(&mut self) {
        self.cache.unmount(&self.key);
    }
}

/// One cache per record type, sharing a refetch queue.
#[derive(Clone)]
pub struct CacheSet {
    /// Holds both `tasks` and `tasks:archived` scopes.
    pub tasks: EntityCache<Task>,
    pub people: EntityCache<Person>,
    pub notes: EntityCache<Note>,
    pub labels: EntityCache<Label>,
}

impl CacheSet {
    pub fn new(max_age: Duration) -> (Self, RefetchRequests) {
        let (tx, rx) = mpsc::unbounded_channel();
        let set = Self {
            tasks: EntityCache::new(max_age, tx.clone()),
            people: EntityCache::new(max_age, tx.clone()),
            notes: EntityCache::new(max_age, tx.clone()),
            labels: EntityCache::new(max_age, tx),
        };
        (set, rx)
    }

    /// Invalidate every entry of `scope`, whichever cache holds it.
    pub fn invalidate(&self, scope: CacheScope) -> usize {
        match scope {
            CacheScope::Tasks | CacheScope::ArchivedTasks => self.tasks.invalidate_scope(scope),
            CacheScope::People => self.people.invalidate_scope(scope),
            CacheScope::NotebookNotes => self.notes.invalidate_scope(scope),
            CacheScope::Labels => self.labels.invalidate_scope(scope),
        }
    }
}
