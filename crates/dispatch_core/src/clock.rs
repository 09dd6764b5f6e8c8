//! Engine clock: elapsed-ms time, the UTC epoch mapping, and the deadline
//! timer queue.
//!
//! The engine tracks time as milliseconds since start and maps them onto a
//! configurable UTC epoch for wall-clock concerns (peak-hour fares, snapshot
//! timestamps). Timers are a min-heap by deadline; ties pop in scheduling
//! order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::protocol::{RideId, UserId};

/// Deferred work fired by the engine loop when its deadline passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Run a matching pass for a `Requested` ride.
    TryMatch(RideId),
    /// The held driver did not accept in time; release and re-queue.
    AcceptanceTimeout { ride: RideId, driver: UserId },
}

#[derive(Debug, Clone)]
struct Timer {
    deadline_ms: u64,
    seq: u64,
    kind: TimerKind,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by deadline.
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Resource)]
pub struct EngineClock {
    epoch: DateTime<Utc>,
    now_ms: u64,
    seq: u64,
    timers: BinaryHeap<Timer>,
}

impl EngineClock {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            now_ms: 0,
            seq: 0,
            timers: BinaryHeap::new(),
        }
    }

    /// Milliseconds since engine start.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Advance the clock. Called by the engine loop before each event.
    pub fn set_now(&mut self, now_ms: u64) {
        debug_assert!(now_ms >= self.now_ms, "engine time must not go backwards");
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Wall-clock instant for an engine timestamp.
    pub fn to_wall(&self, at_ms: u64) -> DateTime<Utc> {
        self.epoch + ChronoDuration::milliseconds(at_ms as i64)
    }

    /// Wall-clock instant for the current engine time.
    pub fn wall_time(&self) -> DateTime<Utc> {
        self.to_wall(self.now_ms)
    }

    pub fn schedule_at(&mut self, deadline_ms: u64, kind: TimerKind) {
        debug_assert!(
            deadline_ms >= self.now_ms,
            "timer deadline must be >= current time"
        );
        let seq = self.seq;
        self.seq += 1;
        self.timers.push(Timer { deadline_ms, seq, kind });
    }

    pub fn schedule_in(&mut self, delay_ms: u64, kind: TimerKind) {
        self.schedule_at(self.now_ms.saturating_add(delay_ms), kind);
    }

    /// Deadline of the nearest pending timer, if any.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.timers.peek().map(|t| t.deadline_ms)
    }

    /// Pop the next timer whose deadline is at or before the current time.
    pub fn pop_due(&mut self) -> Option<TimerKind> {
        if self.timers.peek().is_some_and(|t| t.deadline_ms <= self.now_ms) {
            self.timers.pop().map(|t| t.kind)
        } else {
            None
        }
    }

    pub fn is_idle(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}
