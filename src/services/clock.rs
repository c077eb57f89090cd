//! Session clock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::domain::errors::{ArgPosition, SimError, SimResult};
use crate::domain::models::ClockConfig;
use crate::services::event_bus::{self, Emitter, Subscriber, DEFAULT_CHANNEL_CAPACITY};

/// Default tick period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Events published by the clock. Elapsed times are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClockEvent {
    /// The clock was (re)started.
    Started,
    /// Periodic tick while running.
    Tick {
        /// Milliseconds since the clock started.
        elapsed_ms: u64,
    },
    /// The clock was stopped.
    Stopped {
        /// Milliseconds between start and stop.
        elapsed_ms: u64,
    },
}

impl ClockEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "clock/start",
            Self::Tick { .. } => "clock/tick",
            Self::Stopped { .. } => "clock/stop",
        }
    }
}

/// Format a duration as `mm:ss`. Minutes keep counting past 59.
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

struct ClockInner {
    tick_interval: Duration,
    started_at: Mutex<Instant>,
    generation: AtomicU64,
    running: AtomicBool,
    halted: Notify,
    emitter: Emitter<ClockEvent>,
}

/// Measures time since the most recent start and ticks while running.
///
/// Unlike the other components a clock can be started again after a stop;
/// each start resets the reference instant and retires the previous tick loop.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    /// Create a stopped clock ticking every `tick_interval` once started.
    pub fn new(tick_interval: Duration) -> SimResult<Self> {
        if tick_interval < Duration::from_millis(1) {
            return Err(SimError::validation(
                ArgPosition::First,
                "tickInterval",
                "at least 1 millisecond",
                tick_interval,
            ));
        }

        let (emitter, _) = event_bus::channel(DEFAULT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(ClockInner {
                tick_interval,
                started_at: Mutex::new(Instant::now()),
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
                halted: Notify::new(),
                emitter,
            }),
        })
    }

    /// Create a clock from configuration.
    pub fn from_config(config: &ClockConfig) -> SimResult<Self> {
        Self::new(Duration::from_millis(config.tick_interval_ms))
    }

    /// Period between ticks.
    pub fn tick_interval(&self) -> Duration {
        self.inner.tick_interval
    }

    /// Whether the clock is ticking.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Time since the most recent start, whether or not the clock still runs.
    /// Before the first start this is the time since construction.
    pub fn spent_time(&self) -> Duration {
        self.inner.spent_time()
    }

    /// Subscribe to clock events.
    pub fn events(&self) -> Subscriber<ClockEvent> {
        self.inner.emitter.subscriber()
    }

    /// Reset the reference instant and start ticking. The first tick, with
    /// zero elapsed, fires right away.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let started_at = Instant::now();

        *inner.started_at.lock().unwrap_or_else(PoisonError::into_inner) = started_at;
        inner.running.store(true, Ordering::Release);
        // Wake a loop left over from an earlier start so it retires now.
        inner.halted.notify_waiters();
        inner.emitter.emit(ClockEvent::Started);
        info!(tick_interval_ms = inner.tick_interval.as_millis() as u64, "clock started");

        tokio::spawn(async move { inner.tick_loop(generation, started_at).await })
    }

    /// Stop ticking. Stopping a clock that is not running does nothing.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            self.inner.halted.notify_waiters();
            let elapsed_ms = self.inner.spent_time().as_millis() as u64;
            self.inner.emitter.emit(ClockEvent::Stopped { elapsed_ms });
            info!(elapsed = %format_elapsed(self.inner.spent_time()), "clock stopped");
        }
    }
}

impl ClockInner {
    fn spent_time(&self) -> Duration {
        self.started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    async fn tick_loop(&self, generation: u64, started_at: Instant) {
        let mut ticks = interval_at(started_at, self.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let halted = self.halted.notified();
            if !self.is_current(generation) {
                break;
            }

            tokio::select! {
                () = halted => {}
                _ = ticks.tick() => {
                    if !self.is_current(generation) {
                        break;
                    }
                    let elapsed_ms = started_at.elapsed().as_millis() as u64;
                    self.emitter.emit(ClockEvent::Tick { elapsed_ms });
                }
            }
        }

        debug!(generation, "tick loop retired");
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("tick_interval", &self.inner.tick_interval)
            .field("running", &self.is_running())
            .field("spent_time", &self.spent_time())
            .finish()
    }
}
