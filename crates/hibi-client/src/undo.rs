//! Reversible Action Surface.
//!
//! A destructive mutation issues an [`UndoToken`] right after its optimistic
//! phase. The surface keeps the full pre-mutation entity for a fixed window;
//! [`take`](UndoSurface::take) hands it back once, for the inverse mutation
//! to restore. Each token has its own timer, so a second destructive action
//! never extends the first one's window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use hibi_types::{EntityId, Record};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::constants::UNDO_CHANNEL_CAPACITY;
use crate::mutation::MutationError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UndoError {
    #[error("undo window has passed")]
    Expired,
    /// Revoked (the destructive mutation failed) or already used.
    #[error("nothing to undo")]
    Unavailable,
    #[error("undo failed: {0}")]
    Mutation(#[from] MutationError),
}

/// Handle to invert one destructive mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoToken {
    pub id: u64,
    pub entity_id: EntityId,
    pub expires_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UndoEvent {
    Issued(UndoToken),
    Expired(u64),
    Revoked(u64),
    Invoked(u64),
}

struct Slot<T> {
    entity: T,
    expires_at: Instant,
    timer: AbortHandle,
}

struct Inner<T> {
    slots: Mutex<HashMap<u64, Slot<T>>>,
    next_id: AtomicU64,
    window: Duration,
    events: broadcast::Sender<UndoEvent>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().values() {
            slot.timer.abort();
        }
    }
}

pub struct UndoSurface<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for UndoSurface<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Record> UndoSurface<T> {
    pub fn new(window: Duration) -> Self {
        let (events, _) = broadcast::channel(UNDO_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                window,
                events,
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Hold `entity` for the undo window. Must be called inside a tokio
    /// runtime.
    pub fn issue(&self, entity: T) -> UndoToken {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + self.inner.window;
        let token = UndoToken { id, entity_id: entity.id().clone(), expires_at };

        {
            // Insert before the timer can observe the map.
            let mut slots = self.inner.slots.lock();
            let timer = tokio::spawn(expire(Arc::downgrade(&self.inner), id, expires_at));
            slots.insert(id, Slot { entity, expires_at, timer: timer.abort_handle() });
        }

        tracing::debug!(token = id, entity = %token.entity_id, "undo token issued");
        let _ = self.inner.events.send(UndoEvent::Issued(token.clone()));
        token
    }

    /// Claim the held entity. Succeeds at most once per token.
    pub fn take(&self, token: &UndoToken) -> Result<T, UndoError> {
        let now = Instant::now();
        let slot = self.inner.slots.lock().remove(&token.id);
        match slot {
            Some(slot) if now < slot.expires_at => {
                slot.timer.abort();
                let _ = self.inner.events.send(UndoEvent::Invoked(token.id));
                Ok(slot.entity)
            }
            Some(slot) => {
                slot.timer.abort();
                let _ = self.inner.events.send(UndoEvent::Expired(token.id));
                Err(UndoError::Expired)
            }
            None if now >= token.expires_at => Err(UndoError::Expired),
            None => Err(UndoError::Unavailable),
        }
    }

    /// Withdraw a token. Returns whether it was still live.
    pub fn revoke(&self, token: &UndoToken) -> bool {
        let slot = self.inner.slots.lock().remove(&token.id);
        match slot {
            Some(slot) => {
                slot.timer.abort();
                tracing::debug!(token = token.id, "undo token revoked");
                let _ = self.inner.events.send(UndoEvent::Revoked(token.id));
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, token: &UndoToken) -> bool {
        self.inner.slots.lock().contains_key(&token.id)
    }

    pub fn live_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UndoEvent> {
        self.inner.events.subscribe()
    }
}

async fn expire<T>(inner: Weak<Inner<T>>, id: u64, at: Instant) {
    tokio::time::sleep_until(at).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let expired = inner.slots.lock().remove(&id).is_some();
    if expired {
        tracing::debug!(token = id, "undo token expired");
        let _ = inner.events.send(UndoEvent::Expired(id));
    }
}
