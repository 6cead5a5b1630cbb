//! Per-key admission state.
//!
//! Every limiter is a plain owned value mutated by [`Limiter::admit`]; the
//! engine keeps one per [`RequestKey`] in a [`KeyedStates`] map.

use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::serde_as;

use crate::config::{BucketParams, HumantimeDuration, RateLimit};
use crate::types::{Outcome, RequestKey};

/// Remaining capacity attached to a decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quota {
    Bucket { level: f64, capacity: f64 },
    Windows { windows: Vec<WindowQuota> },
}

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WindowQuota {
    #[serde_as(as = "HumantimeDuration")]
    pub per: std::time::Duration,
    pub limit: usize,
    pub remaining: usize,
}

pub trait Limiter: Default {
    type Params: ?Sized;

    fn admit(&mut self, at: DateTime<Utc>, weight: f64, params: &Self::Params) -> (Outcome, Quota);
}

/// Leaky bucket: load drains at `leak_rate` per second, admitted load must fit
/// under `capacity`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeakyBucket {
    level: f64,
    last_update: Option<DateTime<Utc>>,
}

impl LeakyBucket {
    pub const fn level(&self) -> f64 {
        self.level
    }

    pub const fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
}

impl Limiter for LeakyBucket {
    type Params = BucketParams;

    fn admit(&mut self, at: DateTime<Utc>, weight: f64, params: &BucketParams) -> (Outcome, Quota) {
        let last = *self.last_update.get_or_insert(at);
        let elapsed = elapsed_secs(last, at);
        let drained = (self.level - elapsed * params.leak_rate).max(0.0);

        let outcome = if drained + weight <= params.capacity {
            self.level = drained + weight;
            Outcome::Accepted
        } else {
            self.level = drained;
            Outcome::Rejected
        };
        self.last_update = Some(at);

        (
            outcome,
            Quota::Bucket {
                level: self.level,
                capacity: params.capacity,
            },
        )
    }
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let micros = (to - from).num_microseconds().unwrap_or(i64::MAX).max(0);
    #[allow(clippy::cast_precision_loss)]
    let secs = micros as f64 / 1_000_000.0;
    secs
}

/// Sliding-window counter, one FIFO of admitted timestamps per window.
///
/// Rejected requests are not recorded and never occupy a slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlidingWindow {
    samples: Vec<VecDeque<DateTime<Utc>>>,
}

impl SlidingWindow {
    pub fn len(&self, window: usize) -> usize {
        self.samples.get(window).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.iter().all(VecDeque::is_empty)
    }
}

impl Limiter for SlidingWindow {
    type Params = [RateLimit];

    fn admit(&mut self, at: DateTime<Utc>, _weight: f64, limits: &[RateLimit]) -> (Outcome, Quota) {
        self.samples.resize_with(limits.len(), VecDeque::new);

        for (queue, limit) in self.samples.iter_mut().zip(limits) {
            while let Some(front) = queue.front() {
                if (at - *front).to_std().is_ok_and(|age| age >= limit.per) {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }

        let fits = self
            .samples
            .iter()
            .zip(limits)
            .all(|(queue, limit)| queue.len() < limit.max_events);
        if fits {
            for queue in &mut self.samples {
                queue.push_back(at);
            }
        }

        let windows = self
            .samples
            .iter()
            .zip(limits)
            .map(|(queue, limit)| WindowQuota {
                per: limit.per,
                limit: limit.max_events,
                remaining: limit.max_events.saturating_sub(queue.len()),
            })
            .collect();

        (outcome_of(fits), Quota::Windows { windows })
    }
}

/// Fixed-window counter aligned on the Unix epoch (`floor(secs / per)`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FixedWindow {
    slots: Vec<(i64, usize)>,
}

impl Limiter for FixedWindow {
    type Params = [RateLimit];

    fn admit(&mut self, at: DateTime<Utc>, _weight: f64, limits: &[RateLimit]) -> (Outcome, Quota) {
        self.slots.resize(limits.len(), (i64::MIN, 0));

        for (slot, limit) in self.slots.iter_mut().zip(limits) {
            let bucket = bucket_index(at, limit);
            if slot.0 != bucket {
                *slot = (bucket, 0);
            }
        }

        let fits = self
            .slots
            .iter()
            .zip(limits)
            .all(|((_, count), limit)| *count < limit.max_events);
        if fits {
            for slot in &mut self.slots {
                slot.1 += 1;
            }
        }

        let windows = self
            .slots
            .iter()
            .zip(limits)
            .map(|((_, count), limit)| WindowQuota {
                per: limit.per,
                limit: limit.max_events,
                remaining: limit.max_events.saturating_sub(*count),
            })
            .collect();

        (outcome_of(fits), Quota::Windows { windows })
    }
}

fn bucket_index(at: DateTime<Utc>, limit: &RateLimit) -> i64 {
    let per = i64::try_from(limit.per.as_secs()).unwrap_or(i64::MAX).max(1);
    at.timestamp().div_euclid(per)
}

const fn outcome_of(fits: bool) -> Outcome {
    if fits {
        Outcome::Accepted
    } else {
        Outcome::Rejected
    }
}

/// Explicit key -> state map threaded through a replay.
#[derive(Clone, Debug)]
pub struct KeyedStates<S> {
    states: HashMap<RequestKey, S>,
}

impl<S> Default for KeyedStates<S> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<S: Limiter> KeyedStates<S> {
    /// State for `key`, created on first use.
    pub fn entry(&mut self, key: &RequestKey) -> &mut S {
        self.states.entry(key.clone()).or_default()
    }

    pub fn get(&self, key: &RequestKey) -> Option<&S> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
