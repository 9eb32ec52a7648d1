//! Fixture provisioning: bind a connector to a resolved endpoint identity and
//! run the setup sequence (connect, reset the root namespace, hand back a
//! fresh filesystem view) one caller at a time.
//!
//! Submodules:
//! - `reset`: the root-namespace reset itself
pub mod reset;

pub use reset::{ExclusionSet, ResetError, ResetFailure, ResetReport, reset_root_namespace};

use crate::client::{ConnectError, Connector, NamespaceClient};
use crate::endpoint::EndpointIdentity;
use log::warn;
use thiserror::Error;
use tokio::sync::Mutex;

/// Setup failed before a usable handle existed. Distinct from per-entry
/// deletion failures, which live in the [`ResetReport`].
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("namespace reset failed: {0}")]
    Reset(#[from] ResetError),
}

/// Test-fixture provisioner for one pool+container endpoint.
///
/// At most one provisioning sequence runs at a time per fixture; concurrent
/// callers queue on the internal gate rather than racing the reset.
pub struct Fixture<C: Connector> {
    connector: C,
    identity: EndpointIdentity,
    exclusions: ExclusionSet,
    gate: Mutex<()>,
}

impl<C: Connector> Fixture<C> {
    /// Bind to the process-default identity (environment overrides applied on
    /// first resolution).
    pub fn new(connector: C) -> Self {
        Self::with_identity(connector, EndpointIdentity::process_default().clone())
    }

    pub fn with_identity(connector: C, identity: EndpointIdentity) -> Self {
        Self {
            connector,
            identity,
            exclusions: ExclusionSet::default(),
            gate: Mutex::new(()),
        }
    }

    /// Add a reserved child name the reset must leave alone.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclusions.insert(name);
        self
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn pool_id(&self) -> &str {
        self.identity.pool_id()
    }

    pub fn container_id(&self) -> &str {
        self.identity.container_id()
    }

    /// Reset the namespace, then open an independent filesystem view on it.
    ///
    /// The handle used for the reset is closed before the view is opened; the
    /// two share no state. Mirrors the factory accessor test harnesses call
    /// before every run.
    pub async fn fs_view(&self) -> Result<(C::Fs, ResetReport), FixtureError> {
        let _gate = self.gate.lock().await;
        let client = self.connector.connect(&self.identity).await?;
        let report = match reset_root_namespace(&client, &self.exclusions).await {
            Ok(report) => report,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!("closing reset handle after failure: {close_err}");
                }
                return Err(e.into());
            }
        };
        if let Err(e) = client.close().await {
            // The namespace is already clean; a close failure is not worth
            // failing the setup over.
            warn!("closing reset handle: {e}");
        }
        let fs = self.connector.open_fs_view(&self.identity).await?;
        Ok((fs, report))
    }

    /// Raw client handle bound to the endpoint. No reset side effect; the
    /// caller owns the handle and closes it.
    pub async fn client(&self) -> Result<C::Client, FixtureError> {
        let _gate = self.gate.lock().await;
        Ok(self.connector.connect(&self.identity).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memfs::{MemCluster, MemConnector};
    use crate::client::{FsView, NamespaceClient};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    async fn seeded() -> (MemCluster, EndpointIdentity) {
        let cluster = MemCluster::new();
        let identity = EndpointIdentity::scratch();
        cluster.provision(&identity);
        (cluster, identity)
    }

    #[tokio::test]
    async fn fs_view_resets_then_serves_an_empty_root() {
        let (cluster, identity) = seeded().await;
        let fixture = Fixture::with_identity(cluster.connector(), identity.clone());

        let (view, report) = fixture.fs_view().await.unwrap();
        assert!(report.deleted.is_empty());
        view.mkdir_p("/left-over").await.unwrap();
        view.write_all("/junk.bin", b"junk").await.unwrap();

        let (view, report) = fixture.fs_view().await.unwrap();
        assert_eq!(report.deleted, vec!["junk.bin", "left-over"]);
        assert!(view.readdir("/").await.unwrap().is_empty());
        // Reset handles were closed on the way out.
        assert_eq!(cluster.live_sessions(), 0);
    }

    #[tokio::test]
    async fn raw_client_accessor_does_not_reset() {
        let (cluster, identity) = seeded().await;
        let fixture = Fixture::with_identity(cluster.connector(), identity.clone());

        let view = cluster.connector().open_fs_view(&identity).await.unwrap();
        view.mkdir_p("/untouched").await.unwrap();

        let client = fixture.client().await.unwrap();
        let root = client.resolve("/").await.unwrap();
        let children = client.list_children(&root).await.unwrap();
        assert!(children.contains(&"untouched".to_string()));
        assert!(cluster.delete_log().is_empty());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_a_typed_error() {
        let cluster = MemCluster::new();
        let identity = EndpointIdentity::new(
            "00000000-0000-0000-0000-000000000000",
            "00000000-0000-0000-0000-000000000000",
        );
        let fixture = Fixture::with_identity(cluster.connector(), identity);
        assert!(matches!(
            fixture.fs_view().await,
            Err(FixtureError::Connect(ConnectError::PoolNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn accessors_reflect_the_bound_identity() {
        let (cluster, identity) = seeded().await;
        let fixture = Fixture::with_identity(cluster.connector(), identity.clone());
        assert_eq!(fixture.pool_id(), identity.pool_id());
        assert_eq!(fixture.container_id(), identity.container_id());
    }

    #[tokio::test]
    async fn excluded_names_survive_provisioning() {
        let (cluster, identity) = seeded().await;
        let view = cluster.connector().open_fs_view(&identity).await.unwrap();
        view.mkdir_p("/pinned").await.unwrap();
        view.mkdir_p("/doomed").await.unwrap();

        let fixture =
            Fixture::with_identity(cluster.connector(), identity.clone()).exclude("pinned");
        let (view, report) = fixture.fs_view().await.unwrap();
        assert_eq!(report.deleted, vec!["doomed"]);
        assert!(view.exists("/pinned").await.unwrap());
    }

    /// Connector wrapper that dawdles inside connect so overlapping
    /// provisioning sequences would be visible in the session peak.
    struct SlowConnector {
        inner: MemConnector,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        type Client = <MemConnector as Connector>::Client;
        type Fs = <MemConnector as Connector>::Fs;

        async fn connect(
            &self,
            identity: &EndpointIdentity,
        ) -> Result<Self::Client, ConnectError> {
            let client = self.inner.connect(identity).await?;
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(client)
        }

        async fn open_fs_view(
            &self,
            identity: &EndpointIdentity,
        ) -> Result<Self::Fs, ConnectError> {
            self.inner.open_fs_view(identity).await
        }
    }

    #[tokio::test]
    async fn provisioning_sequences_never_overlap() {
        let (cluster, identity) = seeded().await;
        let fixture = Arc::new(Fixture::with_identity(
            SlowConnector {
                inner: cluster.connector(),
            },
            identity,
        ));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let fixture = Arc::clone(&fixture);
            tasks.push(tokio::spawn(async move {
                fixture.fs_view().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        // One in-flight reset handle at a time, ever.
        assert_eq!(cluster.session_peak(), 1);
        assert_eq!(cluster.live_sessions(), 0);
    }
}
