//! Rotation slots and the round-robin queue
//!
//! A `RotationSlot` caches one identity's auth token together with the
//! init-data it was issued for. The slot is either `Absent` or `Valid`, and
//! only two code paths change that:
//!
//! - `get_or_fill` moves `Absent -> Valid` after a successful acquisition,
//!   records the deadline and arms the expiry timer;
//! - expiration moves `Valid -> Absent` once the deadline has passed.
//!
//! The deadline lives in the state itself, so a `Valid` slot past its
//! deadline reads as `Absent` even when no timer is running. The timer only
//! clears the cached credentials eagerly.
//!
//! There is no invalidation API. A failed acquisition leaves the slot
//! `Absent`, so the next caller starts from scratch.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::Secret;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Token and init-data, always written and cleared together.
#[derive(Debug, Clone)]
pub struct SlotCredentials {
    pub auth_token: Secret<String>,
    pub init_data: String,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Absent,
    Valid {
        credentials: SlotCredentials,
        /// `None` never expires.
        expires_at: Option<Instant>,
        generation: u64,
    },
}

impl SlotState {
    fn current(&self) -> Option<&SlotCredentials> {
        match self {
            SlotState::Valid {
                credentials,
                expires_at,
                ..
            } if expires_at.is_none_or(|deadline| Instant::now() < deadline) => {
                Some(credentials)
            }
            _ => None,
        }
    }
}

/// Timer armed for one particular fill.
#[derive(Debug)]
struct ExpiryTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-identity token cache with an owned expiry timer.
#[derive(Debug)]
pub struct RotationSlot {
    username: String,
    state: Mutex<SlotState>,
    expiry: Mutex<Option<ExpiryTimer>>,
    // Held across the acquisition so a slot is filled once per Absent period.
    fill_lock: Mutex<()>,
    generation: AtomicU64,
}

impl RotationSlot {
    pub fn new(username: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            username: username.into(),
            state: Mutex::new(SlotState::Absent),
            expiry: Mutex::new(None),
            fill_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Copy of the cached credentials, if the slot is `Valid`.
    ///
    /// The returned value is detached from the slot: if the slot expires a
    /// moment later, the copy is unaffected. A cycle must take one snapshot
    /// right after confirming validity and use only that copy.
    pub async fn snapshot(&self) -> Option<SlotCredentials> {
        self.state.lock().await.current().cloned()
    }

    pub async fn is_valid(&self) -> bool {
        self.state.lock().await.current().is_some()
    }

    /// Return a snapshot, acquiring credentials first if the slot is `Absent`.
    ///
    /// `acquire` runs at most once per call, and only while this caller holds
    /// the slot's fill lock. On success the slot becomes `Valid` and, when
    /// `ttl` is `Some`, expires `ttl` from now. On failure the slot stays
    /// `Absent` and the error is returned unchanged.
    pub async fn get_or_fill<F, Fut, E>(
        self: &Arc<Self>,
        ttl: Option<Duration>,
        acquire: F,
    ) -> std::result::Result<SlotCredentials, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<SlotCredentials, E>>,
    {
        if let Some(credentials) = self.snapshot().await {
            return Ok(credentials);
        }

        let _fill = self.fill_lock.lock().await;
        // Another caller may have filled the slot while we waited.
        if let Some(credentials) = self.snapshot().await {
            return Ok(credentials);
        }

        let credentials = acquire().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        *self.state.lock().await = SlotState::Valid {
            credentials: credentials.clone(),
            expires_at,
            generation,
        };
        if let Some(deadline) = expires_at {
            self.arm(generation, deadline).await;
        }
        debug!(username = %self.username, ?ttl, "rotation slot filled");
        Ok(credentials)
    }

    async fn arm(self: &Arc<Self>, generation: u64, deadline: Instant) {
        let slot = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expire(slot, generation).await;
        });
        let previous = self
            .expiry
            .lock()
            .await
            .replace(ExpiryTimer { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Cancel the pending expiry timer.
    ///
    /// Cached credentials are then not cleared eagerly, but the deadline
    /// still applies: past it, the slot reads as `Absent`. A later fill arms
    /// a new timer as usual.
    pub async fn disarm(&self) {
        if let Some(timer) = self.expiry.lock().await.take() {
            timer.handle.abort();
        }
    }
}

/// Clear the slot if it still holds the fill this timer was armed for.
async fn expire(slot: Weak<RotationSlot>, generation: u64) {
    let Some(slot) = slot.upgrade() else {
        return;
    };

    let expired = {
        let mut state = slot.state.lock().await;
        let armed_for_this_fill = matches!(
            &*state,
            SlotState::Valid { generation: current, .. } if *current == generation
        );
        if armed_for_this_fill {
            *state = SlotState::Absent;
        }
        armed_for_this_fill
    };

    {
        let mut expiry = slot.expiry.lock().await;
        if expiry
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
        {
            expiry.take();
        }
    }

    if expired {
        info!(username = %slot.username, "auth token expired");
    }
}

/// Fixed-size round-robin queue of slots.
#[derive(Debug)]
pub struct RotationQueue {
    order: Mutex<VecDeque<Arc<RotationSlot>>>,
    slots: Vec<Arc<RotationSlot>>,
}

impl RotationQueue {
    pub fn new(slots: Vec<Arc<RotationSlot>>) -> Self {
        Self {
            order: Mutex::new(slots.iter().cloned().collect()),
            slots,
        }
    }

    /// Take the front slot and push it to the back in one step.
    pub async fn next(&self) -> Option<Arc<RotationSlot>> {
        let mut order = self.order.lock().await;
        let slot = order.pop_front()?;
        order.push_back(slot.clone());
        Some(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All slots in initialization order.
    pub fn slots(&self) -> &[Arc<RotationSlot>] {
        &self.slots
    }
}
