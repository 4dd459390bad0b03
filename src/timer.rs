//! Periodic Timer Queue
//!
//! Ordered collection of periodic jobs for the screen event loop.
//!
//! # Ownership
//!
//! The queue never owns a job. Callers hold the `Arc<dyn Job>`; the queue keeps
//! a [`Weak`] handle plus the job's identity. A job that is dropped while
//! scheduled is silently purged the next time it comes due.
//!
//! # Firing
//!
//! [`TimerQueue::process_due`] re-arms every due timer and hands back
//! [`DueJob`] handles. The caller runs them *after* releasing the queue lock,
//! because a job may add or remove timers. Before running each one the caller
//! must check [`TimerQueue::is_scheduled`] so that a job removed by an earlier
//! job in the same batch is not invoked.
//!
//! ```text
//! add(job, 50ms) ──> [deadline=t0+50ms, seq=0]
//!                        │
//! process_due(now) ──────┴──> due: [job]   re-armed: [deadline=now+50ms]
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{Result, ScreenError};

/// A unit of work run by the event loop when its timer fires
pub trait Job: Send + Sync {
    /// Run the job. Called on the event loop thread with no screen locks held.
    fn run(&self);
}

impl<F> Job for F
where
    F: Fn() + Send + Sync,
{
    fn run(&self) {
        self()
    }
}

/// Identity of a job, derived from its allocation address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey(usize);

impl JobKey {
    /// Identity of `job`
    pub fn of(job: &Arc<dyn Job>) -> Self {
        JobKey(Arc::as_ptr(job) as *const () as usize)
    }
}

/// One scheduled timer
#[derive(Clone)]
struct Timer {
    key: JobKey,
    job: Weak<dyn Job>,
    period: Duration,
    deadline: Instant,
    seq: u64,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// A job collected by [`TimerQueue::process_due`]
#[derive(Clone)]
pub struct DueJob {
    key: JobKey,
    job: Weak<dyn Job>,
}

impl DueJob {
    /// Identity of the job
    pub fn key(&self) -> JobKey {
        self.key
    }

    /// Strong handle, if the job is still alive
    pub fn upgrade(&self) -> Option<Arc<dyn Job>> {
        self.job.upgrade()
    }
}

impl std::fmt::Debug for DueJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DueJob").field("key", &self.key).finish()
    }
}

/// Min-first queue of periodic timers keyed by job identity
///
/// At most one timer exists per job. Not synchronized; the screen wraps it in
/// its own lock, independent of the main screen lock.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Timer>>,
    next_seq: u64,
}

impl TimerQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `job` to fire every `period`, replacing any existing timer for it
    pub fn add(&mut self, job: &Arc<dyn Job>, period: Duration, now: Instant) -> Result<()> {
        if period.is_zero() {
            return Err(ScreenError::InvalidTimerPeriod(period));
        }

        let key = JobKey::of(job);
        self.remove_key(key);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Timer {
            key,
            job: Arc::downgrade(job),
            period,
            deadline: now + period,
            seq,
        }));
        Ok(())
    }

    /// Remove the timer for `job`; no-op if none
    pub fn remove(&mut self, job: &Arc<dyn Job>) {
        self.remove_key(JobKey::of(job));
    }

    fn remove_key(&mut self, key: JobKey) {
        self.heap.retain(|Reverse(t)| t.key != key);
    }

    /// Whether a timer for `key` is currently armed
    pub fn is_scheduled(&self, key: JobKey) -> bool {
        self.heap.iter().any(|Reverse(t)| t.key == key)
    }

    /// Whether `job` has a timer
    pub fn contains(&self, job: &Arc<dyn Job>) -> bool {
        self.is_scheduled(JobKey::of(job))
    }

    /// Period of the timer for `job`
    pub fn period_of(&self, job: &Arc<dyn Job>) -> Option<Duration> {
        let key = JobKey::of(job);
        self.heap
            .iter()
            .find(|Reverse(t)| t.key == key)
            .map(|Reverse(t)| t.period)
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no timer is armed
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Time until the nearest deadline, `None` when nothing is armed
    pub fn next_wake(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|Reverse(t)| t.deadline.saturating_duration_since(now))
    }

    /// Pop every timer due at `now`, re-arm it one period from `now`, and
    /// return the collected jobs in firing order
    pub fn process_due(&mut self, now: Instant) -> Vec<DueJob> {
        let mut due = Vec::new();
        let mut rearmed = Vec::new();

        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Some(Reverse(mut timer)) = self.heap.pop() else {
                break;
            };

            // dropped jobs fall out of the queue here
            if timer.job.strong_count() == 0 {
                continue;
            }

            due.push(DueJob {
                key: timer.key,
                job: timer.job.clone(),
            });
            timer.deadline = now + timer.period;
            rearmed.push(timer);
        }

        for mut timer in rearmed {
            timer.seq = self.next_seq;
            self.next_seq += 1;
            self.heap.push(Reverse(timer));
        }

        due
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("timers", &self.heap.len())
            .finish()
    }
}
