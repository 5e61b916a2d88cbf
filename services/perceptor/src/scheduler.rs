//! Scan queue and lease table.
//!
//! The scheduler holds two indexes over image digests:
//!
//! - the **queue**: every `Unscanned` image, ordered by priority (highest
//!   first) and then by first-observation order (FIFO)
//! - the **lease table**: every image occupying a slot of the concurrency
//!   budget, with the time its lease was taken and the time its current
//!   phase began
//!
//! It lives inside the model and is only touched from the model's status
//! transition routine, so both indexes always agree with image statuses.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use scanward_id::ImageSha;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
    sha: ImageSha,
}

/// A claim on one slot of the concurrency budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub acquired_at: Instant,
    pub phase_started_at: Instant,
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub concurrent_scan_limit: usize,
    pub in_flight: usize,
    pub queued: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    limit: usize,
    queue: BTreeSet<QueueKey>,
    leases: HashMap<ImageSha, Lease>,
}

impl Scheduler {
    pub fn new(concurrent_scan_limit: usize) -> Self {
        Self {
            limit: concurrent_scan_limit.max(1),
            queue: BTreeSet::new(),
            leases: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, sha: &ImageSha, priority: i32, seq: u64) {
        self.queue.insert(QueueKey {
            priority: Reverse(priority),
            seq,
            sha: sha.clone(),
        });
    }

    pub fn dequeue(&mut self, sha: &ImageSha, priority: i32, seq: u64) -> bool {
        self.queue.remove(&QueueKey {
            priority: Reverse(priority),
            seq,
            sha: sha.clone(),
        })
    }

    /// Change the concurrency budget, returning the previous one.
    ///
    /// Leases already held are kept. Below the number in flight, no new
    /// lease is granted until enough of them are released.
    pub fn set_limit(&mut self, limit: usize) -> usize {
        std::mem::replace(&mut self.limit, limit.max(1))
    }

    pub fn has_capacity(&self) -> bool {
        self.leases.len() < self.limit
    }

    /// The image that should be leased next, if the budget allows one.
    pub fn peek_next(&self) -> Option<&ImageSha> {
        if !self.has_capacity() {
            return None;
        }
        self.queue.first().map(|key| &key.sha)
    }

    pub fn acquire(&mut self, sha: &ImageSha, now: Instant) {
        self.leases.insert(
            sha.clone(),
            Lease {
                acquired_at: now,
                phase_started_at: now,
            },
        );
    }

    pub fn restart_phase(&mut self, sha: &ImageSha, now: Instant) {
        if let Some(lease) = self.leases.get_mut(sha) {
            lease.phase_started_at = now;
        }
    }

    pub fn release(&mut self, sha: &ImageSha) -> Option<Lease> {
        self.leases.remove(sha)
    }

    pub fn lease(&self, sha: &ImageSha) -> Option<&Lease> {
        self.leases.get(sha)
    }

    /// Leases whose current phase has outlived its timeout.
    pub fn expired(
        &self,
        now: Instant,
        timeout_for: impl Fn(&ImageSha) -> Duration,
    ) -> Vec<ImageSha> {
        let mut expired: Vec<ImageSha> = self
            .leases
            .iter()
            .filter(|(sha, lease)| {
                now.saturating_duration_since(lease.phase_started_at) >= timeout_for(sha)
            })
            .map(|(sha, _)| sha.clone())
            .collect();
        expired.sort();
        expired
    }

    /// Queued digests in scheduling order.
    pub fn queue_order(&self) -> impl Iterator<Item = &ImageSha> {
        self.queue.iter().map(|key| &key.sha)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            concurrent_scan_limit: self.limit,
            in_flight: self.leases.len(),
            queued: self.queue.len(),
        }
    }
}
