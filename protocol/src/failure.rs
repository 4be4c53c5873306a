//! # Phi Accrual Failure Detection
//!
//! Implements the failure detector from Hayashibara et al., "The Phi
//! Accrual Failure Detector". Instead of a binary alive/dead timeout, each
//! peer endpoint accrues a continuous suspicion value *phi* derived from
//! the history of its packet inter-arrival times. The gossiper convicts a
//! peer as Down once phi crosses the configured threshold.
//!
//! Every inbound packet is an implicit heartbeat: the transport address it
//! arrived from gets its window updated. With gossip arriving roughly once
//! per interval, phi grows by about 1 for every missed interval, so the
//! default threshold of 8 tolerates ~8 consecutive losses.
//!
//! The very first observation of an endpoint seeds its window with a
//! generous bootstrap interval (`2 x gossip_interval`) so a newly
//! discovered peer isn't convicted before it has any history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config;
use crate::peer::PeerStatus;

// ---------------------------------------------------------------------------
// ArrivalIntervals
// ---------------------------------------------------------------------------

/// Ring buffer of the most recent inter-arrival intervals (nanoseconds)
/// with a running sum, so the mean is O(1) to maintain.
#[derive(Debug)]
struct ArrivalIntervals {
    capacity: usize,
    intervals: VecDeque<u64>,
    sum: u64,
}

impl ArrivalIntervals {
    fn new(capacity: usize) -> Self {
        ArrivalIntervals {
            // A zero-capacity window could never produce a mean.
            capacity: capacity.max(1),
            intervals: VecDeque::new(),
            sum: 0,
        }
    }

    fn push(&mut self, interval: u64) {
        while self.intervals.len() >= self.capacity {
            if let Some(oldest) = self.intervals.pop_front() {
                self.sum -= oldest;
            }
        }
        self.intervals.push_back(interval);
        self.sum += interval;
    }

    fn mean(&self) -> f64 {
        self.sum as f64 / self.intervals.len() as f64
    }
}

// ---------------------------------------------------------------------------
// ArrivalWindow
// ---------------------------------------------------------------------------

/// Arrival history for one peer endpoint. Timestamps are nanoseconds on the
/// detector's monotonic clock.
#[derive(Debug)]
pub(crate) struct ArrivalWindow {
    last_arrival: u64,
    intervals: ArrivalIntervals,
}

impl ArrivalWindow {
    /// Opens a window at the first observation. The window is seeded with
    /// the bootstrap interval rather than a real sample, so phi stays low
    /// until genuine history accumulates.
    fn new(now: u64, bootstrap_interval: u64, sample_size: usize) -> Self {
        let mut intervals = ArrivalIntervals::new(sample_size);
        intervals.push(bootstrap_interval.max(1));
        ArrivalWindow {
            last_arrival: now,
            intervals,
        }
    }

    /// Records an arrival at `now`.
    fn record(&mut self, now: u64) {
        self.intervals.push(now.saturating_sub(self.last_arrival));
        self.last_arrival = now;
    }

    /// Suspicion level at `now`: the time since the last arrival, measured
    /// in mean intervals. The classical formula scales by 1/log10(10),
    /// which is exactly 1, so the ratio is used directly. phi is 0 at the
    /// moment of arrival and grows linearly with silence.
    fn phi(&self, now: u64) -> f64 {
        let since_last = now.saturating_sub(self.last_arrival);
        since_last as f64 / self.intervals.mean()
    }
}

// ---------------------------------------------------------------------------
// FailureDetector
// ---------------------------------------------------------------------------

/// Tracks an [`ArrivalWindow`] per peer endpoint and converts phi into an
/// Up/Down verdict.
///
/// All operations are O(1) amortized. Windows live in a sharded concurrent
/// map with its own synchronization, separate from the peer map's lock:
/// packet arrival reporting must never contend with digest construction.
pub struct FailureDetector {
    windows: DashMap<String, ArrivalWindow>,
    /// Origin of the detector's monotonic clock.
    epoch: Instant,
    bootstrap_interval: u64,
    sample_size: usize,
    conviction_threshold: f64,
}

impl FailureDetector {
    pub fn new(gossip_interval: Duration, sample_size: usize, conviction_threshold: f64) -> Self {
        FailureDetector {
            windows: DashMap::new(),
            epoch: Instant::now(),
            bootstrap_interval: gossip_interval.as_nanos() as u64
                * u64::from(config::BOOTSTRAP_INTERVAL_FACTOR),
            sample_size,
            conviction_threshold,
        }
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Records a packet arrival from `endpoint`.
    pub fn report(&self, endpoint: &str) {
        self.report_at(endpoint, self.now());
    }

    pub(crate) fn report_at(&self, endpoint: &str, now: u64) {
        match self.windows.entry(endpoint.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().record(now),
            Entry::Vacant(entry) => {
                entry.insert(ArrivalWindow::new(
                    now,
                    self.bootstrap_interval,
                    self.sample_size,
                ));
            }
        }
    }

    /// Current verdict for `endpoint`. An endpoint with no history gets a
    /// window opened on the spot and is assumed Up; the bootstrap interval
    /// ensures it will still be convicted eventually if it never speaks.
    pub fn status(&self, endpoint: &str) -> PeerStatus {
        self.status_at(endpoint, self.now())
    }

    pub(crate) fn status_at(&self, endpoint: &str, now: u64) -> PeerStatus {
        let window = self
            .windows
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                ArrivalWindow::new(now, self.bootstrap_interval, self.sample_size)
            });

        if window.phi(now) > self.conviction_threshold {
            PeerStatus::Down
        } else {
            PeerStatus::Up
        }
    }

    /// Drops all history for an endpoint. Called when a peer is evicted so
    /// a later rejoin starts from a fresh bootstrap window.
    pub fn remove(&self, endpoint: &str) {
        self.windows.remove(endpoint);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
