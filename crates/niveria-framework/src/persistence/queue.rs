//! Coalescing write queue.
//!
//! Holds three disjoint sets per `(EntityKey, CapabilityKind)`:
//!
//! | Set | Meaning |
//! |-----|---------|
//! | pending | waiting for its next flush (possibly in backoff) |
//! | in flight | handed to the store, no result yet |
//! | failed | retry budget exhausted, parked until connectivity returns |
//!
//! A newer write for the same record supersedes the pending one in place;
//! a write that fails while a newer one is pending is dropped in favour of
//! the newer one. Order across different records is not preserved.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use niveria_core::{CapabilityError, CapabilityKind, CapabilityResult, EntityKey, RetryPolicy, Value};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::cache::RecordId;

/// Caller awaiting the durable outcome of a write.
pub(crate) type Waiter = oneshot::Sender<CapabilityResult<()>>;

/// A queued write.
#[derive(Debug)]
pub struct PendingWrite {
    /// Entity the write belongs to.
    pub key: EntityKey,
    /// Capability the write belongs to.
    pub kind: CapabilityKind,
    /// Serialized record value.
    pub payload: Value,
    /// Top-level fields this write removed from the record.
    pub removed: BTreeSet<String>,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest time of the next attempt.
    pub next_retry_at: Instant,
    /// Gateway-assigned version (monotonic per gateway).
    pub version: u64,
    /// Wall-clock time of the local write, used for last-write-wins.
    pub written_at: DateTime<Utc>,
    pub(crate) waiters: Vec<Waiter>,
}

impl PendingWrite {
    pub(crate) fn id(&self) -> RecordId {
        RecordId::new(self.key.clone(), self.kind)
    }

    fn notify(&mut self, outcome: &CapabilityResult<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Operator view of a parked write.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedWrite {
    /// Entity the write belonged to.
    pub key: EntityKey,
    /// Capability the write belonged to.
    pub kind: CapabilityKind,
    /// Attempts made before parking.
    pub attempts: u32,
    /// Write version.
    pub version: u64,
    /// Last failure reason.
    pub reason: String,
    /// When the write was parked.
    pub failed_at: DateTime<Utc>,
}

struct ParkedWrite {
    write: PendingWrite,
    reason: String,
    failed_at: DateTime<Utc>,
}

/// What happened to a write whose store attempt failed.
#[derive(Debug)]
pub(crate) enum FailOutcome {
    /// Back in pending with a backoff delay.
    Retrying { attempts: u32, delay: std::time::Duration },
    /// A newer write for the record was already pending; this one is dropped.
    Superseded,
    /// Retry budget exhausted; parked in the failed set.
    Exhausted(FailedWrite),
    /// The write was no longer in flight.
    Unknown,
}

#[derive(Default)]
pub(crate) struct WriteQueue {
    pending: HashMap<RecordId, PendingWrite>,
    in_flight: HashMap<RecordId, PendingWrite>,
    failed: HashMap<RecordId, ParkedWrite>,
}

impl WriteQueue {
    /// Adds a write, superseding any pending or parked write for the same
    /// record. Returns the pending queue depth.
    pub(crate) fn enqueue(&mut self, mut write: PendingWrite) -> usize {
        let id = write.id();
        if let Some(mut older) = self.pending.remove(&id) {
            // The newer payload keeps the older one's backoff schedule, its
            // removals and its waiters, but starts with a full retry budget.
            write.next_retry_at = write.next_retry_at.max(older.next_retry_at);
            let present = write.payload.as_object();
            write.removed.extend(
                std::mem::take(&mut older.removed)
                    .into_iter()
                    .filter(|field| present.is_none_or(|map| !map.contains_key(field))),
            );
            older.waiters.append(&mut write.waiters);
            write.waiters = older.waiters;
        }
        self.failed.remove(&id);
        self.pending.insert(id, write);
        self.pending.len()
    }

    /// Moves up to `limit` due writes into the in-flight set.
    ///
    /// A record already in flight is skipped so two writes for the same
    /// record are never outstanding at once.
    pub(crate) fn take_due(&mut self, now: Instant, limit: usize, ignore_backoff: bool) -> Vec<PendingWrite> {
        let mut due: Vec<RecordId> = self
            .pending
            .iter()
            .filter(|(id, w)| {
                (ignore_backoff || w.next_retry_at <= now) && !self.in_flight.contains_key(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        due.sort_by_key(|id| self.pending.get(id).map(|w| w.version));
        due.truncate(limit);

        let mut batch = Vec::with_capacity(due.len());
        for id in due {
            if let Some(write) = self.pending.remove(&id) {
                self.in_flight.insert(id, PendingWrite {
                    key: write.key.clone(),
                    kind: write.kind,
                    payload: write.payload.clone(),
                    removed: write.removed.clone(),
                    attempts: write.attempts,
                    next_retry_at: write.next_retry_at,
                    version: write.version,
                    written_at: write.written_at,
                    waiters: Vec::new(),
                });
                batch.push(write);
            }
        }
        batch
    }

    /// Confirms an in-flight write and notifies its waiters.
    pub(crate) fn acknowledge(&mut self, mut write: PendingWrite) {
        self.in_flight.remove(&write.id());
        write.notify(&Ok(()));
    }

    /// Records a failed attempt for an in-flight write.
    pub(crate) fn fail(
        &mut self,
        mut write: PendingWrite,
        reason: String,
        policy: &RetryPolicy,
        now: Instant,
    ) -> FailOutcome {
        let id = write.id();
        if self.in_flight.remove(&id).is_none() {
            return FailOutcome::Unknown;
        }
        write.attempts += 1;

        if let Some(newer) = self.pending.get_mut(&id) {
            newer.waiters.append(&mut write.waiters);
            return FailOutcome::Superseded;
        }

        if policy.exhausted(write.attempts) {
            let failed_at = Utc::now();
            write.notify(&Err(CapabilityError::DurableWriteFailed {
                key: write.key.clone(),
                kind: write.kind,
                attempts: write.attempts,
                reason: reason.clone(),
            }));
            let summary = FailedWrite {
                key: write.key.clone(),
                kind: write.kind,
                attempts: write.attempts,
                version: write.version,
                reason: reason.clone(),
                failed_at,
            };
            self.failed.insert(id, ParkedWrite {
                write,
                reason,
                failed_at,
            });
            return FailOutcome::Exhausted(summary);
        }

        let delay = policy.delay_for(write.attempts);
        write.next_retry_at = now + delay;
        let attempts = write.attempts;
        self.pending.insert(id, write);
        FailOutcome::Retrying { attempts, delay }
    }

    /// Moves every parked write back to pending with a fresh budget.
    pub(crate) fn requeue_failed(&mut self, now: Instant) -> usize {
        let parked: Vec<_> = self.failed.drain().collect();
        let count = parked.len();
        for (id, ParkedWrite { mut write, .. }) in parked {
            write.attempts = 0;
            write.next_retry_at = now;
            self.pending.entry(id).or_insert(write);
        }
        count
    }

    /// Newest locally written value not yet confirmed by the store.
    pub(crate) fn overlay(&self, id: &RecordId) -> Option<Value> {
        self.pending
            .get(id)
            .or_else(|| self.in_flight.get(id))
            .or_else(|| self.failed.get(id).map(|p| &p.write))
            .map(|w| w.payload.clone())
    }

    pub(crate) fn failed_writes(&self) -> Vec<FailedWrite> {
        let mut list: Vec<FailedWrite> = self
            .failed
            .values()
            .map(|p| FailedWrite {
                key: p.write.key.clone(),
                kind: p.write.kind,
                attempts: p.write.attempts,
                version: p.write.version,
                reason: p.reason.clone(),
                failed_at: p.failed_at,
            })
            .collect();
        list.sort_by_key(|f| f.version);
        list
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn failed_len(&self) -> usize {
        self.failed.len()
    }
}
