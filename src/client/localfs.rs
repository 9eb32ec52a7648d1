//! Local-directory backend: pools and containers are directories under a
//! root, `<root>/<pool_id>/<container_id>`. Useful for exercising the fixture
//! against a real filesystem without any cluster.

use super::{
    ClientError, ConnectError, Connector, EntryRef, FsView, NamespaceClient, parse_service_ranks,
};
use crate::endpoint::EndpointIdentity;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

pub struct LocalDirConnector {
    root: PathBuf,
}

impl LocalDirConnector {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    async fn container_dir(&self, identity: &EndpointIdentity) -> Result<PathBuf, ConnectError> {
        parse_service_ranks(identity.service_ranks())?;
        let pool_dir = self.root.join(identity.pool_id());
        match fs::metadata(&pool_dir).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Err(ConnectError::PoolNotFound(identity.pool_id().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConnectError::PoolNotFound(identity.pool_id().to_string()));
            }
            Err(e) => return Err(ConnectError::Transport(e)),
        }
        let cont_dir = pool_dir.join(identity.container_id());
        match fs::metadata(&cont_dir).await {
            Ok(m) if m.is_dir() => Ok(cont_dir),
            Ok(_) => Err(ConnectError::ContainerNotFound {
                pool: identity.pool_id().to_string(),
                container: identity.container_id().to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConnectError::ContainerNotFound {
                pool: identity.pool_id().to_string(),
                container: identity.container_id().to_string(),
            }),
            Err(e) => Err(ConnectError::Transport(e)),
        }
    }
}

#[async_trait]
impl Connector for LocalDirConnector {
    type Client = LocalDirClient;
    type Fs = LocalDirFsView;

    async fn connect(&self, identity: &EndpointIdentity) -> Result<Self::Client, ConnectError> {
        Ok(LocalDirClient {
            base: self.container_dir(identity).await?,
        })
    }

    async fn open_fs_view(&self, identity: &EndpointIdentity) -> Result<Self::Fs, ConnectError> {
        Ok(LocalDirFsView {
            base: self.container_dir(identity).await?,
        })
    }
}

/// Join a namespace path under the container directory. Rejects any path that
/// would escape it; a `..` in a listing must never delete the pool above us.
fn abs(base: &Path, path: &str) -> Result<PathBuf, ClientError> {
    let rel = Path::new(path.trim_start_matches('/'));
    for comp in rel.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(ClientError::Backend(format!(
                    "path {path:?} escapes the container root"
                )));
            }
        }
    }
    Ok(base.join(rel))
}

pub struct LocalDirClient {
    base: PathBuf,
}

#[async_trait]
impl NamespaceClient for LocalDirClient {
    async fn resolve(&self, path: &str) -> Result<EntryRef, ClientError> {
        let full = abs(&self.base, path)?;
        match fs::metadata(&full).await {
            Ok(_) => Ok(EntryRef::new(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ClientError::NotFound(path.to_string()))
            }
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    async fn list_children(&self, entry: &EntryRef) -> Result<Vec<String>, ClientError> {
        let full = abs(&self.base, entry.path())?;
        let meta = fs::metadata(&full).await?;
        if !meta.is_dir() {
            return Err(ClientError::NotADirectory(entry.path().to_string()));
        }
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&full).await?;
        while let Some(item) = dir.next_entry().await? {
            names.push(item.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn delete_recursive(
        &self,
        entry: &EntryRef,
        recursive: bool,
    ) -> Result<bool, ClientError> {
        let full = abs(&self.base, entry.path())?;
        let meta = match fs::metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ClientError::Io(e)),
        };
        let outcome = if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&full).await
            } else {
                fs::remove_dir(&full).await
            }
        } else {
            fs::remove_file(&full).await
        };
        match outcome {
            Ok(()) => Ok(true),
            // Directory-not-empty and similar refusals are a failed delete,
            // not a transport error.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Ok(false),
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    async fn close(self) -> Result<(), ClientError> {
        // Nothing held beyond the path; the handle just goes away.
        Ok(())
    }
}

pub struct LocalDirFsView {
    base: PathBuf,
}

#[async_trait]
impl FsView for LocalDirFsView {
    async fn mkdir_p(&self, path: &str) -> Result<(), ClientError> {
        fs::create_dir_all(abs(&self.base, path)?).await?;
        Ok(())
    }

    async fn create_file(&self, path: &str) -> Result<(), ClientError> {
        let full = abs(&self.base, path)?;
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::File::create(full).await?;
        Ok(())
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> Result<(), ClientError> {
        let full = abs(&self.base, path)?;
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(full, data).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let full = abs(&self.base, path)?;
        match fs::read(&full).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ClientError::NotFound(path.to_string()))
            }
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let full = abs(&self.base, path)?;
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&full).await?;
        while let Some(item) = dir.next_entry().await? {
            names.push(item.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        match fs::metadata(abs(&self.base, path)?).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ClientError::Io(e)),
        }
    }
}
