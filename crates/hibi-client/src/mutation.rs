//! Mutation Coordinator.
//!
//! Every write goes through the same life cycle:
//!
//! ```text
//!   Idle ──begin──▶ Optimistic ──finish(Ok)──▶ Committed
//!                        │
//!                        └────finish(Err)────▶ RolledBack (+ error notice)
//! ```
//!
//! [`begin`](MutationCoordinator::begin) snapshots the touched keys and pushes
//! the plan's optimistic layers in one step. [`Pending::finish`] then either
//! folds the server's record into the confirmed value or drops the layers, in
//! both cases atomically across every touched key. Plans with no optimistic
//! step (creates whose id and placement only the server knows) bump the
//! in-flight counter instead, for a loading affordance.
//!
//! A [`Pending`] dropped without `finish` rolls back, so a cancelled caller
//! never leaves an orphaned layer behind.
//!
//! No retries. A failed mutation is reported once and forgotten.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hibi_types::{CacheKey, CacheScope, EntityId, Record};
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;

use crate::api::ApiError;
use crate::cache::{EntityCache, MutationId, Transform};
use crate::notice::{Notice, Notices};

/// Why a mutation rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Network failure; the server may or may not have applied it.
    #[error("network error: {0}")]
    Transport(String),
    /// The server answered with a failure status (validation, not found, …).
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// The server answered success with a body we could not read.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<ApiError> for MutationError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(msg) => MutationError::Transport(msg),
            ApiError::Status { status, message } => MutationError::Rejected { status, message },
            ApiError::Decode(msg) => MutationError::Protocol(msg),
        }
    }
}

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<R> {
    Committed(R),
    RolledBack(MutationError),
}

impl<R> MutationOutcome<R> {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed(_))
    }

    pub fn committed(&self) -> Option<&R> {
        match self {
            MutationOutcome::Committed(r) => Some(r),
            MutationOutcome::RolledBack(_) => None,
        }
    }

    pub fn into_result(self) -> Result<R, MutationError> {
        match self {
            MutationOutcome::Committed(r) => Ok(r),
            MutationOutcome::RolledBack(e) => Err(e),
        }
    }
}

/// What a mutation will do to the cache before the server answers.
pub struct MutationPlan<T> {
    label: String,
    steps: Vec<(CacheKey, Transform<T>)>,
    touched: Vec<CacheKey>,
}

impl<T: Record> MutationPlan<T> {
    /// `label` reads as a verb phrase: "archive task", "add person".
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), steps: Vec::new(), touched: Vec::new() }
    }

    /// Transform the visible value of `key` until the mutation settles.
    pub fn optimistic(
        mut self,
        key: CacheKey,
        transform: impl Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        self = self.touches(key.clone());
        self.steps.push((key, Arc::new(transform)));
        self
    }

    /// Reconcile `key` with the server's answer on commit, with no
    /// optimistic change.
    pub fn touches(mut self, key: CacheKey) -> Self {
        if !self.touched.contains(&key) {
            self.touched.push(key);
        }
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_optimistic(&self) -> bool {
        !self.steps.is_empty()
    }
}

struct CoordinatorInner {
    next_id: AtomicU64,
    notices: Notices,
    in_flight: watch::Sender<usize>,
}

/// Runs mutations against an [`EntityCache`]. Clones share the id sequence
/// and the in-flight counter.
#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl MutationCoordinator {
    pub fn new(notices: Notices) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(CoordinatorInner { next_id: AtomicU64::new(1), notices, in_flight }),
        }
    }

    /// Non-optimistic mutations currently awaiting the server.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Watch [`in_flight`](Self::in_flight) for a loading indicator.
    pub fn loading(&self) -> watch::Receiver<usize> {
        self.inner.in_flight.subscribe()
    }

    /// Enter the optimistic phase.
    pub fn begin<T: Record>(&self, cache: &EntityCache<T>, plan: MutationPlan<T>) -> Pending<T> {
        let id = MutationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let optimistic = plan.is_optimistic();
        let span = tracing::info_span!("mutation.run", mutation = %id, label = %plan.label);

        let snapshot = cache.snapshot(&plan.touched);
        if optimistic {
            cache.apply_layers(id, &plan.steps);
        } else {
            self.inner.in_flight.send_modify(|n| *n += 1);
        }
        span.in_scope(|| {
            tracing::debug!(keys = plan.touched.len(), optimistic, "mutation started");
        });

        Pending {
            coordinator: self.clone(),
            cache: cache.clone(),
            id,
            label: plan.label,
            touched: plan.touched,
            snapshot,
            optimistic,
            span,
            settled: false,
        }
    }

    /// Begin, await `call`, finish.
    ///
    /// `reconcile` folds the server's answer into the confirmed value of each
    /// touched key. It must replace records wholesale, never merge.
    pub async fn run<T, R, F>(
        &self,
        cache: &EntityCache<T>,
        plan: MutationPlan<T>,
        call: F,
        reconcile: impl Fn(CacheScope, Vec<T>, &R) -> Vec<T>,
    ) -> MutationOutcome<R>
    where
        T: Record,
        F: Future<Output = Result<R, ApiError>>,
    {
        let pending = self.begin(cache, plan);
        let result = call.instrument(pending.span().clone()).await;
        pending.finish(result, reconcile)
    }
}

/// A mutation in its optimistic phase.
pub struct Pending<T: Record> {
    coordinator: MutationCoordinator,
    cache: EntityCache<T>,
    id: MutationId,
    label: String,
    touched: Vec<CacheKey>,
    snapshot: HashMap<CacheKey, Option<Vec<T>>>,
    optimistic: bool,
    span: tracing::Span,
    settled: bool,
}

impl<T: Record> Pending<T> {
    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Visible values of the touched keys just before this mutation began.
    pub fn snapshot(&self) -> &HashMap<CacheKey, Option<Vec<T>>> {
        &self.snapshot
    }

    /// The record with `id` as it looked before this mutation began.
    pub fn previous(&self, id: &EntityId) -> Option<T> {
        self.touched
            .iter()
            .filter_map(|key| self.snapshot.get(key).and_then(Option::as_ref))
            .find_map(|items| items.iter().find(|r| r.id() == id).cloned())
    }

    /// Settle with the server's answer.
    pub fn finish<R>(
        mut self,
        result: Result<R, ApiError>,
        reconcile: impl Fn(CacheScope, Vec<T>, &R) -> Vec<T>,
    ) -> MutationOutcome<R> {
        let _enter = self.span.clone().entered();
        let outcome = match result {
            Ok(reply) => {
                let fold = |scope: CacheScope, items: Vec<T>| reconcile(scope, items, &reply);
                self.cache.settle(self.id, &self.touched, Some(&fold));
                tracing::debug!("mutation committed");
                MutationOutcome::Committed(reply)
            }
            Err(err) => {
                let err = MutationError::from(err);
                self.cache.settle(self.id, &self.touched, None);
                tracing::info!(error = %err, "mutation rolled back");
                self.coordinator
                    .inner
                    .notices
                    .publish(Notice::error(format!("Couldn't {}: {}", self.label, err)));
                MutationOutcome::RolledBack(err)
            }
        };
        self.release();
        self.stale_filtered_views();
        outcome
    }

    /// Filtered views of the touched scopes may now hold the record or not;
    /// only the server can say.
    fn stale_filtered_views(&self) {
        let scopes: BTreeSet<CacheScope> = self.touched.iter().map(|k| k.scope).collect();
        for scope in scopes {
            self.cache.invalidate_filtered(scope, &self.touched);
        }
    }

    fn release(&mut self) {
        self.settled = true;
        if !self.optimistic {
            self.coordinator.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

impl<T: Record> Drop for Pending<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.span.in_scope(|| tracing::debug!("mutation abandoned, rolling back"));
        self.cache.settle(self.id, &self.touched, None);
        self.release();
    }
}
