//! Address selection strategies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;

use stratus_core::{Endpoint, ServiceDescriptor};

/// Picks one endpoint out of a candidate list.
pub trait AddressSelector: Send + Sync + 'static {
    /// Select a candidate. Returns `None` only for an empty list.
    fn select(&self, descriptor: &ServiceDescriptor, candidates: &[Endpoint]) -> Option<Endpoint>;
}

/// Round-robin over the candidates, with one counter per descriptor.
///
/// N selections against a stable list of N candidates hit each candidate
/// exactly once, whichever threads they come from: the order is fixed by
/// the counter increments, not by arrival time.
#[derive(Debug, Default)]
pub struct PollingSelector {
    counters: DashMap<ServiceDescriptor, AtomicUsize>,
}

impl PollingSelector {
    /// Create a selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, descriptor: &ServiceDescriptor) -> usize {
        if let Some(counter) = self.counters.get(descriptor) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(descriptor.clone())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl AddressSelector for PollingSelector {
    fn select(&self, descriptor: &ServiceDescriptor, candidates: &[Endpoint]) -> Option<Endpoint> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.next_index(descriptor);
        Some(candidates[idx % candidates.len()].clone())
    }
}

/// Uniform random pick with no shared state.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RandomSelector {
    /// Create a selector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AddressSelector for RandomSelector {
    fn select(&self, _descriptor: &ServiceDescriptor, candidates: &[Endpoint]) -> Option<Endpoint> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }
}

/// Built-in selection strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectorKind {
    /// Round-robin, see [`PollingSelector`].
    #[default]
    Polling,
    /// Uniform random, see [`RandomSelector`].
    Random,
}

impl SelectorKind {
    /// Instantiate the strategy.
    #[must_use]
    pub fn build(self) -> Arc<dyn AddressSelector> {
        match self {
            Self::Polling => Arc::new(PollingSelector::new()),
            Self::Random => Arc::new(RandomSelector::new()),
        }
    }
}
