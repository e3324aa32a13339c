//! Priority admission queue
//!
//! Entries are ordered by priority (higher first) and then by arrival. Each
//! entry holds the sending half of a one-shot permit; the waiting caller
//! runs its own operation once the permit arrives.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ResilienceError;

/// Why a queued caller was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Expired { waited: Duration },
    Cleared,
    ShuttingDown,
}

impl Rejection {
    pub(crate) fn into_error<E>(self) -> ResilienceError<E> {
        match self {
            Rejection::Expired { waited } => ResilienceError::RequestExpired { waited },
            Rejection::Cleared => ResilienceError::QueueCleared,
            Rejection::ShuttingDown => ResilienceError::ShuttingDown,
        }
    }
}

pub(crate) type Permit = oneshot::Sender<Result<(), Rejection>>;
pub(crate) type PermitReceiver = oneshot::Receiver<Result<(), Rejection>>;

#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub(crate) id: Uuid,
    pub(crate) priority: i32,
    seq: u64,
    pub(crate) enqueued_at: Instant,
    permit: Permit,
}

impl QueuedRequest {
    /// Hand the caller its admission. False if the caller has gone away.
    pub(crate) fn admit(self) -> bool {
        self.permit.send(Ok(())).is_ok()
    }

    pub(crate) fn reject(self, reason: Rejection) {
        let _ = self.permit.send(Err(reason));
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the earlier arrival
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub(crate) struct AdmissionQueue {
    heap: BinaryHeap<QueuedRequest>,
    next_seq: u64,
}

impl AdmissionQueue {
    pub(crate) fn push(&mut self, priority: i32, now: Instant) -> (Uuid, PermitReceiver) {
        let (permit, receiver) = oneshot::channel();
        let id = Uuid::new_v4();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(QueuedRequest { id, priority, seq, enqueued_at: now, permit });
        (id, receiver)
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedRequest> {
        self.heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.heap.iter()
    }

    /// Reject every entry, returning how many there were
    pub(crate) fn reject_all(&mut self, reason: Rejection) -> usize {
        let count = self.heap.len();
        for entry in self.heap.drain() {
            entry.reject(reason);
        }
        count
    }
}
