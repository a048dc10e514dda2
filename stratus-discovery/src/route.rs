//! Route snapshots and the provider trait.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use stratus_core::{Endpoint, ServiceDescriptor, StratusError};

/// Error type for resolution operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// The descriptor has no candidate endpoints.
    #[error("no candidate endpoint for {0}")]
    NoCandidate(String),

    /// The route provider itself failed.
    #[error("route provider error: {0}")]
    Provider(String),
}

impl From<ResolveError> for StratusError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoCandidate(descriptor) => StratusError::NoCandidate(descriptor),
            ResolveError::Provider(message) => StratusError::NoCandidate(message),
        }
    }
}

/// Immutable descriptor → endpoints table.
///
/// A snapshot is never modified after it is built. Refreshing routes means
/// publishing a new snapshot, so a reader holding an `Arc<RouteSnapshot>`
/// always sees one consistent table.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    version: u64,
    routes: HashMap<ServiceDescriptor, Arc<[Endpoint]>>,
}

impl RouteSnapshot {
    /// Start building a snapshot.
    #[must_use]
    pub fn builder() -> RouteSnapshotBuilder {
        RouteSnapshotBuilder::default()
    }

    /// A snapshot with no routes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Candidates for a descriptor, in publication order. Empty if unknown.
    #[must_use]
    pub fn candidates(&self, descriptor: &ServiceDescriptor) -> &[Endpoint] {
        self.routes.get(descriptor).map_or(&[][..], |e| &e[..])
    }

    /// Version stamped at build time.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Descriptors present in this snapshot.
    pub fn descriptors(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.routes.keys()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the snapshot has no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Copy this snapshot's routes into a builder for the next version.
    #[must_use]
    pub fn to_builder(&self) -> RouteSnapshotBuilder {
        RouteSnapshotBuilder {
            version: self.version + 1,
            routes: self
                .routes
                .iter()
                .map(|(d, e)| (d.clone(), e.to_vec()))
                .collect(),
        }
    }
}

/// Builder for [`RouteSnapshot`].
#[derive(Debug, Default)]
pub struct RouteSnapshotBuilder {
    version: u64,
    routes: HashMap<ServiceDescriptor, Vec<Endpoint>>,
}

impl RouteSnapshotBuilder {
    /// Set the version stamp.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Replace the candidates of a descriptor. Duplicates are dropped,
    /// keeping the first occurrence.
    #[must_use]
    pub fn route(
        mut self,
        descriptor: ServiceDescriptor,
        endpoints: impl IntoIterator<Item = Endpoint>,
    ) -> Self {
        let mut unique: Vec<Endpoint> = Vec::new();
        for endpoint in endpoints {
            if !unique.contains(&endpoint) {
                unique.push(endpoint);
            }
        }
        self.routes.insert(descriptor, unique);
        self
    }

    /// Remove a descriptor.
    #[must_use]
    pub fn remove(mut self, descriptor: &ServiceDescriptor) -> Self {
        self.routes.remove(descriptor);
        self
    }

    /// Freeze the snapshot.
    #[must_use]
    pub fn build(self) -> RouteSnapshot {
        RouteSnapshot {
            version: self.version,
            routes: self
                .routes
                .into_iter()
                .map(|(d, e)| (d, Arc::from(e)))
                .collect(),
        }
    }
}

/// Source of route snapshots.
///
/// Discovery backends (registry polling, file watching) live outside this
/// crate and only need to publish snapshots through this trait.
pub trait RouteProvider: Send + Sync + 'static {
    /// Current snapshot covering the descriptor.
    fn get_route(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> impl Future<Output = Result<Arc<RouteSnapshot>, ResolveError>> + Send;

    /// Stream yielding every newly published snapshot, starting with the
    /// current one.
    fn watch(&self) -> impl Stream<Item = Arc<RouteSnapshot>> + Send + Unpin;
}

impl<P: RouteProvider> RouteProvider for Arc<P> {
    fn get_route(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> impl Future<Output = Result<Arc<RouteSnapshot>, ResolveError>> + Send {
        (**self).get_route(descriptor)
    }

    fn watch(&self) -> impl Stream<Item = Arc<RouteSnapshot>> + Send + Unpin {
        (**self).watch()
    }
}

/// A provider holding snapshots published in-process.
///
/// Useful for tests, or as the sink an external discovery loop publishes to.
///
/// ```rust
/// use stratus_discovery::StaticRouteProvider;
/// use stratus_core::{Endpoint, ServiceDescriptor};
///
/// let provider = StaticRouteProvider::new();
/// provider.set_route(
///     ServiceDescriptor::new("user.get"),
///     [Endpoint::new("10.0.0.1", 9000), Endpoint::new("10.0.0.2", 9000)],
/// );
/// assert_eq!(provider.current().version(), 1);
/// ```
pub struct StaticRouteProvider {
    current: watch::Sender<Arc<RouteSnapshot>>,
}

impl StaticRouteProvider {
    /// Create a provider with an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(RouteSnapshot::empty())
    }

    /// Create a provider with an initial snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: RouteSnapshot) -> Self {
        let (current, _) = watch::channel(Arc::new(snapshot));
        Self { current }
    }

    /// The currently published snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<RouteSnapshot> {
        self.current.borrow().clone()
    }

    /// Replace the published snapshot wholesale.
    pub fn publish(&self, snapshot: RouteSnapshot) {
        tracing::debug!(version = snapshot.version(), routes = snapshot.len(), "publishing route snapshot");
        self.current.send_replace(Arc::new(snapshot));
    }

    /// Publish a new snapshot in which `descriptor` maps to `endpoints`.
    pub fn set_route(
        &self,
        descriptor: ServiceDescriptor,
        endpoints: impl IntoIterator<Item = Endpoint>,
    ) {
        self.update(|builder| builder.route(descriptor, endpoints));
    }

    /// Publish a new snapshot without `descriptor`.
    pub fn remove_route(&self, descriptor: &ServiceDescriptor) {
        self.update(|builder| builder.remove(descriptor));
    }

    /// Derive the next snapshot from the current one under the channel's
    /// write lock, so concurrent updates never drop each other.
    fn update(&self, edit: impl FnOnce(RouteSnapshotBuilder) -> RouteSnapshotBuilder) {
        self.current.send_modify(|current| {
            let next = edit(current.to_builder()).build();
            tracing::debug!(version = next.version(), routes = next.len(), "publishing route snapshot");
            *current = Arc::new(next);
        });
    }
}

impl Default for StaticRouteProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteProvider for StaticRouteProvider {
    async fn get_route(
        &self,
        _descriptor: &ServiceDescriptor,
    ) -> Result<Arc<RouteSnapshot>, ResolveError> {
        Ok(self.current())
    }

    fn watch(&self) -> impl Stream<Item = Arc<RouteSnapshot>> + Send + Unpin {
        WatchStream::new(self.current.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port)
    }

    #[test]
    fn test_builder_dedups_preserving_order() {
        let d = ServiceDescriptor::new("svc");
        let snapshot = RouteSnapshot::builder()
            .route(d.clone(), [ep(2), ep(1), ep(2), ep(3)])
            .build();
        assert_eq!(snapshot.candidates(&d), &[ep(2), ep(1), ep(3)]);
        assert!(snapshot.candidates(&ServiceDescriptor::new("other")).is_empty());
    }

    #[tokio::test]
    async fn test_old_snapshot_unaffected_by_publish() {
        let d = ServiceDescriptor::new("svc");
        let provider = StaticRouteProvider::new();
        provider.set_route(d.clone(), [ep(1), ep(2)]);

        let before = provider.get_route(&d).await.unwrap();
        provider.set_route(d.clone(), [ep(3)]);
        let after = provider.get_route(&d).await.unwrap();

        assert_eq!(before.candidates(&d), &[ep(1), ep(2)]);
        assert_eq!(after.candidates(&d), &[ep(3)]);
        assert!(after.version() > before.version());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_all_land() {
        let provider = Arc::new(StaticRouteProvider::new());
        let tasks: Vec<_> = (0..32u16)
            .map(|i| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    provider.set_route(ServiceDescriptor::new(format!("svc-{i}")), [ep(i)]);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = provider.current();
        assert_eq!(snapshot.len(), 32);
        assert_eq!(snapshot.version(), 32);
        assert_eq!(snapshot.candidates(&ServiceDescriptor::new("svc-7")), &[ep(7)]);
    }

    #[tokio::test]
    async fn test_remove_route() {
        let d = ServiceDescriptor::new("svc");
        let provider = StaticRouteProvider::new();
        provider.set_route(d.clone(), [ep(1)]);
        provider.remove_route(&d);
        assert!(provider.current().candidates(&d).is_empty());
    }

    #[tokio::test]
    async fn test_watch_sees_publications() {
        let d = ServiceDescriptor::new("svc");
        let provider = StaticRouteProvider::new();
        let mut stream = provider.watch();

        let initial = stream.next().await.unwrap();
        assert!(initial.is_empty());

        provider.set_route(d.clone(), [ep(7)]);
        let updated = stream.next().await.unwrap();
        assert_eq!(updated.candidates(&d), &[ep(7)]);
    }
}
