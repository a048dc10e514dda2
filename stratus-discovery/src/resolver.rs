//! Endpoint resolution: route snapshot + health + selection.

use std::collections::HashSet;
use std::sync::Arc;

use stratus_core::{Endpoint, ServiceDescriptor};

use crate::health::HealthTracker;
use crate::route::{ResolveError, RouteSnapshot};
use crate::selector::AddressSelector;

/// Turns a descriptor into one usable endpoint.
///
/// Healthy candidates are preferred. When every candidate is marked dead the
/// resolver falls back to the unfiltered list instead of failing, because a
/// wrong health signal must not make the service unreachable.
pub struct AddressResolver {
    health: Arc<HealthTracker>,
    selector: Arc<dyn AddressSelector>,
}

impl AddressResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(health: Arc<HealthTracker>, selector: Arc<dyn AddressSelector>) -> Self {
        Self { health, selector }
    }

    /// The health tracker consulted during resolution.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Resolve an endpoint for `descriptor` from `snapshot`.
    pub fn resolve(
        &self,
        descriptor: &ServiceDescriptor,
        snapshot: &RouteSnapshot,
    ) -> Result<Endpoint, ResolveError> {
        self.resolve_excluding(descriptor, snapshot, &HashSet::new())
    }

    /// Resolve, never returning an endpoint in `tried`.
    ///
    /// `tried` is a hard exclusion (endpoints that already failed during the
    /// current call); health is only a preference among what remains.
    pub fn resolve_excluding(
        &self,
        descriptor: &ServiceDescriptor,
        snapshot: &RouteSnapshot,
        tried: &HashSet<Endpoint>,
    ) -> Result<Endpoint, ResolveError> {
        let remaining: Vec<Endpoint> = snapshot
            .candidates(descriptor)
            .iter()
            .filter(|e| !tried.contains(*e))
            .cloned()
            .collect();

        if remaining.is_empty() {
            return Err(ResolveError::NoCandidate(descriptor.to_string()));
        }

        let healthy: Vec<Endpoint> = remaining
            .iter()
            .filter(|e| self.health.is_healthy(e))
            .cloned()
            .collect();

        let pool = if healthy.is_empty() {
            tracing::debug!(
                descriptor = %descriptor,
                candidates = remaining.len(),
                "all candidates marked dead, selecting from the full list"
            );
            remaining
        } else {
            healthy
        };

        self.selector
            .select(descriptor, &pool)
            .ok_or_else(|| ResolveError::NoCandidate(descriptor.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use crate::selector::{PollingSelector, RandomSelector};

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port)
    }

    fn setup(endpoints: &[Endpoint]) -> (AddressResolver, ServiceDescriptor, RouteSnapshot) {
        let health = Arc::new(HealthTracker::new(HealthConfig::new().failure_threshold(1)));
        let resolver = AddressResolver::new(health, Arc::new(PollingSelector::new()));
        let d = ServiceDescriptor::new("svc");
        let snapshot = RouteSnapshot::builder()
            .route(d.clone(), endpoints.iter().cloned())
            .build();
        (resolver, d, snapshot)
    }

    #[test]
    fn test_empty_route_is_no_candidate() {
        let (resolver, d, snapshot) = setup(&[]);
        assert!(matches!(
            resolver.resolve(&d, &snapshot),
            Err(ResolveError::NoCandidate(_))
        ));

        let unknown = ServiceDescriptor::new("unknown");
        assert!(resolver.resolve(&unknown, &snapshot).is_err());
    }

    #[test]
    fn test_dead_endpoints_are_skipped() {
        let (resolver, d, snapshot) = setup(&[ep(1), ep(2), ep(3)]);
        resolver.health().mark_failure(&ep(2));

        for _ in 0..6 {
            assert_ne!(resolver.resolve(&d, &snapshot).unwrap(), ep(2));
        }
    }

    #[test]
    fn test_falls_back_when_all_dead() {
        let (resolver, d, snapshot) = setup(&[ep(1), ep(2)]);
        resolver.health().mark_failure(&ep(1));
        resolver.health().mark_failure(&ep(2));

        let picked = resolver.resolve(&d, &snapshot).unwrap();
        assert!(picked == ep(1) || picked == ep(2));
    }

    #[test]
    fn test_tried_endpoints_are_hard_excluded() {
        let (resolver, d, snapshot) = setup(&[ep(1), ep(2)]);
        resolver.health().mark_failure(&ep(2));

        let tried: HashSet<Endpoint> = [ep(1)].into_iter().collect();
        // ep(2) is dead but it is all that is left.
        assert_eq!(resolver.resolve_excluding(&d, &snapshot, &tried).unwrap(), ep(2));

        let all: HashSet<Endpoint> = [ep(1), ep(2)].into_iter().collect();
        assert!(resolver.resolve_excluding(&d, &snapshot, &all).is_err());
    }

    #[test]
    fn test_random_selector_respects_health() {
        let health = Arc::new(HealthTracker::new(HealthConfig::new().failure_threshold(1)));
        let resolver = AddressResolver::new(health.clone(), Arc::new(RandomSelector::new()));
        let d = ServiceDescriptor::new("svc");
        let snapshot = RouteSnapshot::builder().route(d.clone(), [ep(1), ep(2)]).build();
        health.mark_failure(&ep(1));

        for _ in 0..50 {
            assert_eq!(resolver.resolve(&d, &snapshot).unwrap(), ep(2));
        }
    }
}
