//! Admission queue serializing access to the generative backend.
//!
//! The backend accepts one request at a time, so every submission is given a
//! turn ticket and served in strict arrival order. Waiters are woken through
//! a watch channel signaled at promotion time. A short settling pause between
//! a release and the next promotion keeps bursty completions from hitting the
//! backend back-to-back.
//!
//! Queue state is in-memory and process-local; a restart drops all in-flight
//! tickets. Tickets abandoned while still pending are not pruned: once
//! promoted they hold the turn until an upstream timeout intervenes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Pause between a release and the next promotion.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Unique identifier for an admitted request's place in line.
///
/// UUID v4 keeps ids unguessable and collision-free across concurrent
/// admissions within the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(uuid::Uuid);

impl TicketId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One admitted caller's place in line.
///
/// Owned by the caller that obtained it; the queue tracks only the id.
#[derive(Debug, Clone)]
pub struct TurnTicket {
    id: TicketId,
    enqueued_at: DateTime<Utc>,
}

impl TurnTicket {
    fn new() -> Self {
        Self {
            id: TicketId::new(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Admission time, for observability only. Ordering is structural.
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// Read-only projection of queue state for client polling.
///
/// `position` is the 1-based place among waiting tickets, or 0 for a ticket
/// that is not waiting: unknown, already current, or finished. The cases are
/// deliberately indistinguishable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub position: usize,
    pub is_currently_processing: bool,
    pub current_holder: Option<TicketId>,
}

struct QueueState {
    /// Waiting tickets in arrival order. A ticket leaves this deque exactly
    /// once, by promotion.
    pending: VecDeque<TicketId>,
    /// At most one ticket holds the turn at any instant.
    current: Option<TicketId>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Mirrors `state.current`; waiters in `await_turn` subscribe here.
    current_tx: watch::Sender<Option<TicketId>>,
    settle_delay: Duration,
}

impl QueueInner {
    /// The critical sections only move ids between `pending` and `current`,
    /// so a poisoned lock still holds consistent state.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("queue state mutex poisoned, continuing");
            poisoned.into_inner()
        })
    }

    /// Move the oldest pending ticket into the turn slot. The only path that
    /// sets `current`; callers must have verified it is empty.
    fn promote_next(&self, state: &mut QueueState) {
        if let Some(next) = state.pending.pop_front() {
            state.current = Some(next);
            self.current_tx.send_replace(Some(next));
            tracing::debug!(ticket = %next, "ticket promoted to current holder");
        }
    }
}

/// FIFO admission queue for the single backend call slot.
///
/// Cheap to clone; clones share the same queue. `release` schedules the
/// delayed promotion on the Tokio runtime, so the queue must live inside one.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<QueueInner>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::with_settle_delay(SETTLE_DELAY)
    }

    /// Override the settling pause (tests use a short one).
    pub fn with_settle_delay(settle_delay: Duration) -> Self {
        let (current_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    current: None,
                }),
                current_tx,
                settle_delay,
            }),
        }
    }

    /// Register a new ticket at the tail of the line. Never fails; the queue
    /// is unbounded. If no ticket holds the turn, the head of the line (not
    /// necessarily the new ticket) is promoted immediately.
    pub fn admit(&self) -> TurnTicket {
        let ticket = TurnTicket::new();
        let mut state = self.inner.lock_state();
        state.pending.push_back(ticket.id());
        if state.current.is_none() {
            self.inner.promote_next(&mut state);
        }
        let position = state.pending.len();
        drop(state);
        tracing::debug!(ticket = %ticket.id(), position, "request admitted");
        ticket
    }

    /// Give up the turn held by `id` and schedule the next promotion after
    /// the settling pause.
    ///
    /// A release by anything other than the current holder is a no-op, so
    /// cleanup paths may release repeatedly without promoting out of order.
    pub fn release(&self, id: TicketId) {
        let mut state = self.inner.lock_state();
        if state.current != Some(id) {
            tracing::debug!(ticket = %id, "ignoring release from non-holder");
            return;
        }
        state.current = None;
        self.inner.current_tx.send_replace(None);
        let has_pending = !state.pending.is_empty();
        drop(state);
        tracing::debug!(ticket = %id, "turn released");

        if !has_pending {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.settle_delay).await;
            let mut state = inner.lock_state();
            // An admission during the pause may have taken the slot already.
            if state.current.is_none() {
                inner.promote_next(&mut state);
            }
        });
    }

    /// Suspend until `id` holds the turn. Wakes at promotion time.
    ///
    /// No deadline is imposed here; callers bound the wait upstream (e.g.
    /// with an HTTP request timeout).
    pub async fn await_turn(&self, id: TicketId) {
        let mut rx = self.inner.current_tx.subscribe();
        loop {
            if *rx.borrow_and_update() == Some(id) {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as any queue handle; not reachable
                // while `self` exists.
                return;
            }
        }
    }

    /// Tie the turn held by `id` to a guard that releases it on drop.
    pub fn guard(&self, id: TicketId) -> TurnGuard {
        TurnGuard {
            queue: self.clone(),
            id,
        }
    }

    /// Snapshot of queue state. Pure read; safe to poll at any rate.
    pub fn status(&self, ticket: Option<TicketId>) -> QueueStatus {
        let state = self.inner.lock_state();
        let position = ticket
            .and_then(|id| state.pending.iter().position(|t| *t == id))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        QueueStatus {
            queue_length: state.pending.len(),
            is_processing: state.current.is_some(),
            position,
            is_currently_processing: ticket.is_some() && ticket == state.current,
            current_holder: state.current,
        }
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the held turn when dropped, so the queue advances on every exit
/// path, including cancellation of the caller's future.
#[must_use = "dropping the guard releases the turn immediately"]
pub struct TurnGuard {
    queue: AdmissionQueue,
    id: TicketId,
}

impl TurnGuard {
    pub fn ticket_id(&self) -> TicketId {
        self.id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.queue.release(self.id);
    }
}
