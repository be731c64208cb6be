//! Bounded event channel with an explicit drop policy, and the pump task
//! fanning events out to the sinks, the dashboard and the scorecard.

use crate::dashboard::DashboardHub;
use crate::event::Event;
use crate::scorecard::Scorecard;
use crate::sink::LogSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Default channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Bounded multi-producer event queue. When full, the oldest non-error
/// event is dropped and counted; error events are protected.
pub struct EventBus {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
    last_saturation_warn: Mutex<Option<Instant>>,
}

impl EventBus {
    /// Bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Bus with an explicit capacity (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            last_saturation_warn: Mutex::new(None),
        }
    }

    /// Enqueue an event, applying the drop policy when saturated.
    pub fn emit(&self, event: Event) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                if let Some(index) = queue.iter().position(|e| !e.is_error()) {
                    queue.remove(index);
                    self.count_drop();
                } else if event.is_error() {
                    // queue full of errors: oldest error yields to newest
                    queue.pop_front();
                    self.count_drop();
                } else {
                    self.count_drop();
                    return;
                }
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_saturation_warn.lock();
        let now = Instant::now();
        let due = last.map_or(true, |t| now.duration_since(t) >= Duration::from_secs(1));
        if due {
            *last = Some(now);
            warn!(
                dropped_total = self.dropped.load(Ordering::Relaxed),
                "event channel saturated, dropping oldest non-error events"
            );
        }
    }

    /// Total events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain everything currently queued without waiting.
    pub fn try_drain(&self) -> Vec<Event> {
        self.queue.lock().drain(..).collect()
    }

    /// Wait for events. Returns an empty batch only once the bus is
    /// closed and fully drained.
    pub async fn recv_batch(&self) -> Vec<Event> {
        loop {
            let batch = self.try_drain();
            if !batch.is_empty() {
                return batch;
            }
            if self.closed.load(Ordering::Acquire) {
                return Vec::new();
            }
            self.notify.notified().await;
        }
    }

    /// Close the bus; the pump exits after draining.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the pump task: one consumer loop feeding the log sink, the
/// dashboard fan-out and the scorecard aggregator.
pub fn spawn_pump(
    bus: Arc<EventBus>,
    sink: Arc<LogSink>,
    dashboard: Arc<DashboardHub>,
    scorecard: Arc<Scorecard>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let batch = bus.recv_batch().await;
            if batch.is_empty() {
                break;
            }
            for event in batch {
                scorecard.observe(&event);
                dashboard.publish(event.clone());
                sink.write_event(&event);
            }
            scorecard.set_events_dropped(bus.dropped());
        }
        scorecard.set_events_dropped(bus.dropped());
        sink.flush();
        debug!("event pump drained and stopped");
    })
}
