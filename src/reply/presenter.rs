//! Staggered insertion of display units.
//!
//! Units are queued on a single FIFO worker per view. Unit `i` of a batch
//! becomes due `i * interval` after the batch is scheduled, and the worker
//! never reorders: a later batch waits behind an earlier one. Scheduling is
//! fire-and-forget and there is no cancellation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::warn;

use crate::reply::display::DisplayUnit;

/// Delay between consecutive units of one batch.
pub const STAGGER_INTERVAL: Duration = Duration::from_millis(500);

/// Destination for inserted units.
pub trait DisplaySink: Send + Sync + 'static {
    /// Append one unit to the visible conversation.
    fn insert(&self, unit: DisplayUnit);
}

/// In-memory visible conversation.
#[derive(Clone, Debug, Default)]
pub struct ConversationView {
    units: Arc<Mutex<Vec<DisplayUnit>>>,
}

impl ConversationView {
    /// Create an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the units inserted so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DisplayUnit> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of units inserted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been inserted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DisplaySink for ConversationView {
    fn insert(&self, unit: DisplayUnit) {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(unit);
    }
}

/// A unit together with its offset from the start of its batch.
#[derive(Clone, Debug, Serialize)]
pub struct ScheduledUnit {
    /// The unit.
    #[serde(flatten)]
    pub unit: DisplayUnit,
    /// Offset from scheduling, in milliseconds.
    pub delay_ms: u64,
}

struct Pending {
    due: Instant,
    unit: DisplayUnit,
}

/// Schedules units onto a [`DisplaySink`] with a staggered delay.
#[derive(Clone)]
pub struct StaggeredPresenter {
    queue: mpsc::UnboundedSender<Pending>,
    interval: Duration,
}

impl StaggeredPresenter {
    /// Spawn the delivery worker with the default interval.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn<S: DisplaySink>(sink: S) -> Self {
        Self::with_interval(sink, STAGGER_INTERVAL)
    }

    /// Spawn the delivery worker with a custom interval.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_interval<S: DisplaySink>(sink: S, interval: Duration) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(deliver(sink, pending));
        Self { queue, interval }
    }

    /// Schedule a batch. Returns immediately with each unit's offset.
    #[must_use]
    pub fn present(&self, units: Vec<DisplayUnit>) -> Vec<ScheduledUnit> {
        let start = Instant::now();
        units
            .into_iter()
            .enumerate()
            .map(|(index, unit)| {
                let offset = self
                    .interval
                    .saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
                self.enqueue(start + offset, unit.clone());
                ScheduledUnit {
                    unit,
                    delay_ms: u64::try_from(offset.as_millis()).unwrap_or(u64::MAX),
                }
            })
            .collect()
    }

    /// Schedule a single unit with no delay, behind anything already queued.
    pub fn present_now(&self, unit: DisplayUnit) {
        self.enqueue(Instant::now(), unit);
    }

    fn enqueue(&self, due: Instant, unit: DisplayUnit) {
        if self.queue.send(Pending { due, unit }).is_err() {
            warn!("Display worker stopped; dropping unit");
        }
    }
}

async fn deliver<S: DisplaySink>(sink: S, mut pending: mpsc::UnboundedReceiver<Pending>) {
    while let Some(Pending { due, mut unit }) = pending.recv().await {
        sleep_until(due).await;
        unit.created_at = Utc::now();
        sink.insert(unit);
    }
}
