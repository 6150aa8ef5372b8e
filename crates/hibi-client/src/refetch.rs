//! Background refetcher.
//!
//! Drains the cache's refetch queue and fetches each key from the store. At
//! most one fetch per key runs at a time; a request that arrives while one is
//! in flight schedules exactly one more run after it, so the last answer
//! always reflects a read that started after the last invalidation.
//!
//! A fetch whose key had a mutation settle into it while the read was out is
//! dropped and run again, so a pre-commit answer never replaces the commit.
//!
//! A failed fetch is logged and leaves the entry stale for the next trigger.

use std::collections::HashMap;
use std::sync::Arc;

use hibi_types::{CacheKey, CacheScope, Record};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::api::{Apis, EntityApi};
use crate::cache::{CacheSet, EntityCache, RefetchRequests};

/// Per-key flag: another run was requested while this one was in flight.
type InFlight = Arc<Mutex<HashMap<CacheKey, bool>>>;

#[derive(Clone)]
pub struct Refetcher {
    apis: Apis,
    caches: CacheSet,
    in_flight: InFlight,
    cancel: CancellationToken,
}

impl Refetcher {
    pub fn new(apis: Apis, caches: CacheSet, cancel: CancellationToken) -> Self {
        Self { apis, caches, in_flight: Arc::default(), cancel }
    }

    /// Drain `requests` until cancelled or every sender is gone.
    pub fn spawn(self, mut requests: RefetchRequests) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let key = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    key = requests.recv() => key,
                };
                match key {
                    Some(key) => self.request(key),
                    None => break,
                }
            }
            tracing::debug!("refetcher stopped");
        })
    }

    /// Queue one fetch of `key`, coalescing with any in flight.
    pub fn request(&self, key: CacheKey) {
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(rerun) = in_flight.get_mut(&key) {
                *rerun = true;
                return;
            }
            in_flight.insert(key.clone(), false);
        }

        let this = self.clone();
        let span = tracing::debug_span!("refetch", key = %key);
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = this.cancel.cancelled() => {
                        this.in_flight.lock().remove(&key);
                    }
                    _ = this.run(&key) => {}
                }
            }
            .instrument(span),
        );
    }

    /// Keys with a fetch currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn run(&self, key: &CacheKey) {
        loop {
            if !self.fetch(key).await {
                tracing::debug!(key = %key, "refetch superseded by a commit, rerunning");
                continue;
            }
            if !self.rerun_requested(key) {
                return;
            }
        }
    }

    /// Clear the rerun flag, or retire the key if none was set. One lock, so
    /// a request can never slip between the check and the removal.
    fn rerun_requested(&self, key: &CacheKey) -> bool {
        let mut in_flight = self.in_flight.lock();
        if let Some(rerun) = in_flight.get_mut(key) {
            if *rerun {
                *rerun = false;
                return true;
            }
        }
        in_flight.remove(key);
        false
    }

    /// `false` if the answer was dropped as older than a settled mutation.
    async fn fetch(&self, key: &CacheKey) -> bool {
        match key.scope {
            CacheScope::Tasks | CacheScope::ArchivedTasks => {
                fetch_into(self.apis.tasks.as_ref(), &self.caches.tasks, key).await
            }
            CacheScope::People => fetch_into(self.apis.people.as_ref(), &self.caches.people, key).await,
            CacheScope::NotebookNotes => {
                fetch_into(self.apis.notes.as_ref(), &self.caches.notes, key).await
            }
            CacheScope::Labels => fetch_into(self.apis.labels.as_ref(), &self.caches.labels, key).await,
        }
    }
}

async fn fetch_into<T: Record>(api: &dyn EntityApi<T>, cache: &EntityCache<T>, key: &CacheKey) -> bool {
    let epoch = cache.fetch_epoch(key);
    match api.list(key).await {
        Ok(items) => {
            tracing::debug!(count = items.len(), "refetched");
            cache.write_fetched(key, items, epoch)
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "refetch failed");
            true
        }
    }
}
