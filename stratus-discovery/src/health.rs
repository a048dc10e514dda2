//! Per-endpoint health tracking and background probing.
//!
//! Health is a soft signal. The resolver prefers healthy endpoints but will
//! still hand out a dead one when nothing else is left, so a false positive
//! here can never make a service unreachable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use stratus_core::{Endpoint, HealthProbe, HealthReporter};

/// Health tracking configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures after which an endpoint is marked dead.
    pub failure_threshold: u32,
    /// How often the prober wakes up.
    pub probe_interval: Duration,
    /// Minimum time between two probes of the same dead endpoint.
    pub probe_cooldown: Duration,
    /// Timeout for a single probe connect.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_interval: Duration::from_secs(5),
            probe_cooldown: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl HealthConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold (at least 1).
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the probe interval.
    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the probe cooldown.
    #[must_use]
    pub fn probe_cooldown(mut self, cooldown: Duration) -> Self {
        self.probe_cooldown = cooldown;
        self
    }

    /// Set the probe timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Eligible for normal selection.
    Healthy,
    /// Avoided unless nothing else is available.
    Dead,
}

/// Point-in-time view of one endpoint's health entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Current status.
    pub status: HealthStatus,
    /// When the endpoint was last probed (or marked dead).
    pub last_probe: Option<Instant>,
}

#[derive(Debug)]
struct EntryState {
    consecutive_failures: u32,
    status: HealthStatus,
    last_probe: Option<Instant>,
}

/// One endpoint's entry. Writers take the mutex; readers only load `dead`.
#[derive(Debug)]
struct HealthEntry {
    dead: AtomicBool,
    state: Mutex<EntryState>,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            dead: AtomicBool::new(false),
            state: Mutex::new(EntryState {
                consecutive_failures: 0,
                status: HealthStatus::Healthy,
                last_probe: None,
            }),
        }
    }
}

/// Tracks consecutive failures per endpoint and flips endpoints between
/// healthy and dead.
///
/// ## Example
///
/// ```rust
/// use stratus_discovery::{HealthConfig, HealthTracker};
/// use stratus_core::Endpoint;
///
/// let tracker = HealthTracker::new(HealthConfig::new().failure_threshold(2));
/// let ep = Endpoint::new("10.0.0.1", 9000);
///
/// tracker.mark_failure(&ep);
/// assert!(tracker.is_healthy(&ep));
/// tracker.mark_failure(&ep);
/// assert!(!tracker.is_healthy(&ep));
/// tracker.mark_success(&ep);
/// assert!(tracker.is_healthy(&ep));
/// ```
pub struct HealthTracker {
    entries: DashMap<Endpoint, Arc<HealthEntry>>,
    config: HealthConfig,
    probing: AtomicBool,
}

impl HealthTracker {
    /// Create a tracker.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            probing: AtomicBool::new(false),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn entry(&self, endpoint: &Endpoint) -> Arc<HealthEntry> {
        if let Some(entry) = self.entries.get(endpoint) {
            return entry.clone();
        }
        self.entries
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(HealthEntry::new()))
            .clone()
    }

    /// Record a failure. Reaching the threshold marks the endpoint dead.
    pub fn mark_failure(&self, endpoint: &Endpoint) {
        let entry = self.entry(endpoint);
        let mut state = entry.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if state.status == HealthStatus::Healthy
            && state.consecutive_failures >= self.config.failure_threshold
        {
            state.status = HealthStatus::Dead;
            state.last_probe = Some(Instant::now());
            entry.dead.store(true, Ordering::Release);
            tracing::warn!(
                endpoint = %endpoint,
                failures = state.consecutive_failures,
                "endpoint marked dead"
            );
        }
    }

    /// Record a success, resetting the failure count and reviving the endpoint.
    pub fn mark_success(&self, endpoint: &Endpoint) {
        let Some(entry) = self.entries.get(endpoint).map(|e| e.clone()) else {
            return;
        };
        let mut state = entry.state.lock();
        state.consecutive_failures = 0;
        if state.status == HealthStatus::Dead {
            state.status = HealthStatus::Healthy;
            entry.dead.store(false, Ordering::Release);
            tracing::info!(endpoint = %endpoint, "endpoint recovered");
        }
    }

    /// Whether the endpoint is currently considered healthy.
    /// Endpoints never seen before are healthy.
    #[must_use]
    pub fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        self.entries
            .get(endpoint)
            .is_none_or(|e| !e.dead.load(Ordering::Acquire))
    }

    /// Current state of an endpoint's entry, if one exists.
    #[must_use]
    pub fn snapshot(&self, endpoint: &Endpoint) -> Option<HealthSnapshot> {
        let entry = self.entries.get(endpoint)?.clone();
        let state = entry.state.lock();
        Some(HealthSnapshot {
            consecutive_failures: state.consecutive_failures,
            status: state.status,
            last_probe: state.last_probe,
        })
    }

    /// All endpoints currently marked dead.
    #[must_use]
    pub fn dead_endpoints(&self) -> Vec<Endpoint> {
        self.entries
            .iter()
            .filter(|e| e.value().dead.load(Ordering::Acquire))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Dead endpoints whose last probe is older than the cooldown.
    fn due_for_probe(&self, now: Instant) -> Vec<(Endpoint, Arc<HealthEntry>)> {
        self.entries
            .iter()
            .filter(|e| e.value().dead.load(Ordering::Acquire))
            .filter(|e| {
                e.value()
                    .state
                    .lock()
                    .last_probe
                    .is_none_or(|t| now.saturating_duration_since(t) >= self.config.probe_cooldown)
            })
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Run one probing pass over dead endpoints.
    ///
    /// Returns the number of endpoints that recovered, or `None` when a pass
    /// was already in progress and this call did nothing.
    pub async fn probe_once(&self, probe: &dyn HealthProbe) -> Option<usize> {
        if self
            .probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("probe pass already running, skipping");
            return None;
        }
        let _guard = ProbingGuard(&self.probing);

        let due = self.due_for_probe(Instant::now());
        if due.is_empty() {
            return Some(0);
        }

        let timeout = self.config.probe_timeout;
        let checks = due.into_iter().map(|(endpoint, entry)| async move {
            let alive = matches!(
                tokio::time::timeout(timeout, probe.probe(&endpoint)).await,
                Ok(true)
            );
            (endpoint, entry, alive)
        });

        let mut recovered = 0;
        for (endpoint, entry, alive) in futures::future::join_all(checks).await {
            if alive {
                self.mark_success(&endpoint);
                recovered += 1;
            } else {
                entry.state.lock().last_probe = Some(Instant::now());
                tracing::debug!(endpoint = %endpoint, "probe failed, endpoint stays dead");
            }
        }
        Some(recovered)
    }

    /// Spawn the recurring probe loop on the current tokio runtime.
    pub fn spawn_prober(self: &Arc<Self>, probe: Arc<dyn HealthProbe>) -> ProberHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let tracker = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tracker.config.probe_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Some(recovered) = tracker.probe_once(probe.as_ref()).await {
                            if recovered > 0 {
                                tracing::info!(recovered, "probe pass revived endpoints");
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("health prober stopped");
        });

        ProberHandle { shutdown, task }
    }
}

impl HealthReporter for HealthTracker {
    fn mark_failure(&self, endpoint: &Endpoint) {
        HealthTracker::mark_failure(self, endpoint);
    }

    fn mark_success(&self, endpoint: &Endpoint) {
        HealthTracker::mark_success(self, endpoint);
    }
}

/// Clears the in-progress flag even if the probe pass is cancelled.
struct ProbingGuard<'a>(&'a AtomicBool);

impl Drop for ProbingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a running probe loop.
pub struct ProberHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProberHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
