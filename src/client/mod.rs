//! Storage collaborator contract.
//!
//! Responsibilities:
//! - Define the capability set the fixture consumes from a
//!   pool/container-addressed backend: connect, resolve an entry, list a
//!   directory's immediate children, delete a subtree, close.
//! - Define the path-level filesystem view handed back to test callers.
//!
//! Submodules:
//! - `memfs`: in-memory cluster backend (test double with fault injection)
//! - `localfs`: local-directory backend
pub mod localfs;
pub mod memfs;

use async_trait::async_trait;
use thiserror::Error;

use crate::endpoint::EndpointIdentity;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("pool {0} not found")]
    PoolNotFound(String),
    #[error("container {container} not found in pool {pool}")]
    ContainerNotFound { pool: String, container: String },
    #[error("invalid service rank list {list:?}: {reason}")]
    InvalidServiceList { list: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("entry {0} not found")]
    NotFound(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Token for a resolved namespace entry. Opaque to the fixture; minted by
/// whichever backend resolved it and handed back for the delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    path: String,
}

impl EntryRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Service ranks ride in the identity as a colon-separated string
/// ("0", "0:1:2"). Validated at connect time, not at resolution.
pub fn parse_service_ranks(list: &str) -> Result<Vec<u32>, ConnectError> {
    if list.is_empty() {
        return Err(ConnectError::InvalidServiceList {
            list: list.to_string(),
            reason: "empty rank list".to_string(),
        });
    }
    list.split(':')
        .map(|rank| {
            rank.parse::<u32>()
                .map_err(|e| ConnectError::InvalidServiceList {
                    list: list.to_string(),
                    reason: format!("rank {rank:?}: {e}"),
                })
        })
        .collect()
}

/// An open connection bound to one pool+container.
///
/// The listing is finite and non-restartable; callers get one vector of
/// immediate child names per call. `delete_recursive` reports success as a
/// bool so a refused deletion is distinguishable from a transport failure.
#[async_trait]
pub trait NamespaceClient: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<EntryRef, ClientError>;

    async fn list_children(&self, entry: &EntryRef) -> Result<Vec<String>, ClientError>;

    async fn delete_recursive(
        &self,
        entry: &EntryRef,
        recursive: bool,
    ) -> Result<bool, ClientError>;

    /// Release the connection. Handles are exclusively owned; whoever holds
    /// one closes it.
    async fn close(self) -> Result<(), ClientError>
    where
        Self: Sized;
}

/// Path-level filesystem view for test callers. Whole-file granularity only;
/// block layout and chunking are the backend's business.
#[async_trait]
pub trait FsView: Send + Sync {
    async fn mkdir_p(&self, path: &str) -> Result<(), ClientError>;

    async fn create_file(&self, path: &str) -> Result<(), ClientError>;

    async fn write_all(&self, path: &str, data: &[u8]) -> Result<(), ClientError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ClientError>;

    async fn readdir(&self, path: &str) -> Result<Vec<String>, ClientError>;

    async fn exists(&self, path: &str) -> Result<bool, ClientError>;
}

/// Produces connections bound to an endpoint identity. Each call opens a
/// fresh handle; the filesystem view shares no state with client handles.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: NamespaceClient;
    type Fs: FsView;

    async fn connect(&self, identity: &EndpointIdentity) -> Result<Self::Client, ConnectError>;

    async fn open_fs_view(&self, identity: &EndpointIdentity) -> Result<Self::Fs, ConnectError>;
}
