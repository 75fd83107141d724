use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::format_duration;
use crate::distribution::Distribution;

/// Default window roll period.
pub const DEFAULT_ROLL_RATE: Duration = Duration::from_secs(1);

/// Outcome of a single outbound attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The exchange completed; carries the HTTP status code.
    Response(u16),
    Timeout,
    Error,
}

/// One telemetry event, recorded per outbound attempt.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub outcome: Outcome,
    pub latency: Duration,
}

/// Counters accumulated over one roll window.
#[derive(Debug, Clone)]
pub struct Stats {
    pub requests: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub latency: Distribution,
    pub responses: HashMap<u16, u64>,
}

impl Stats {
    fn new() -> Self {
        Self {
            requests: 0,
            timeouts: 0,
            errors: 0,
            latency: Distribution::new(),
            responses: HashMap::new(),
        }
    }

    fn record(&mut self, event: Event) {
        self.requests += 1;
        self.latency.sample(event.latency.as_nanos() as u64);

        match event.outcome {
            Outcome::Timeout => self.timeouts += 1,
            Outcome::Error => self.errors += 1,
            Outcome::Response(code) => {
                *self.responses.entry(code).or_insert(0) += 1;
            }
        }
    }

    /// Serializable view of this window.
    pub fn snapshot(&self) -> StatsSnapshot {
        let p = self.latency.percentiles();
        StatsSnapshot {
            requests: self.requests,
            timeouts: self.timeouts,
            errors: self.errors,
            latency: LatencySnapshot {
                p50: format_duration(Duration::from_nanos(p.p50)),
                p90: format_duration(Duration::from_nanos(p.p90)),
                p99: format_duration(Duration::from_nanos(p.p99)),
                pmx: format_duration(Duration::from_nanos(p.max)),
            },
            responses: self
                .responses
                .iter()
                .map(|(code, count)| (code.to_string(), *count))
                .collect(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub latency: LatencySnapshot,
    pub responses: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub p50: String,
    pub p90: String,
    pub p99: String,
    pub pmx: String,
}

#[derive(Debug)]
struct Windows {
    current: Stats,
    previous: Arc<Stats>,
    roller: Option<JoinHandle<()>>,
    closed: bool,
}

/// Concurrency-safe accumulator with periodic windowing.
///
/// Events land in the current window; every `rate` the roller publishes it
/// as the previous window and installs a fresh one. `read` only ever sees
/// the published window. The roller starts lazily on first record/read so
/// idle recorders cost nothing, and `close` is safe at any point.
#[derive(Debug)]
pub struct StatsRecorder {
    rate: Duration,
    inner: Arc<Mutex<Windows>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::with_rate(DEFAULT_ROLL_RATE)
    }

    pub fn with_rate(rate: Duration) -> Self {
        Self {
            rate,
            inner: Arc::new(Mutex::new(Windows {
                current: Stats::new(),
                previous: Arc::new(Stats::new()),
                roller: None,
                closed: false,
            })),
        }
    }

    pub fn record(&self, event: Event) {
        let mut windows = self.inner.lock().unwrap();
        self.ensure_roller(&mut windows);
        windows.current.record(event);
    }

    /// Returns the previously rolled window, never the one being written.
    pub fn read(&self) -> Arc<Stats> {
        let mut windows = self.inner.lock().unwrap();
        self.ensure_roller(&mut windows);
        Arc::clone(&windows.previous)
    }

    /// Stops the roller. Further records accumulate into a window that will
    /// never be published. Calling close more than once, or on a recorder
    /// that never recorded, is fine.
    pub fn close(&self) {
        let mut windows = self.inner.lock().unwrap();
        windows.closed = true;
        if let Some(roller) = windows.roller.take() {
            roller.abort();
        }
    }

    fn ensure_roller(&self, windows: &mut Windows) {
        if windows.roller.is_some() || windows.closed {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let rate = self.rate;
        windows.roller = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(rate);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval's first tick fires immediately; skip it so the
            // first window lives a full period.
            tick.tick().await;
            loop {
                tick.tick().await;
                let mut windows = inner.lock().unwrap();
                let rolled = std::mem::take(&mut windows.current);
                windows.previous = Arc::new(rolled);
            }
        }));
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StatsRecorder {
    fn drop(&mut self) {
        self.close();
    }
}
