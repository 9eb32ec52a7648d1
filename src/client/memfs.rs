//! In-memory cluster backend: pools and containers as shared process-local
//! state. The default test double; also handy for demos without a backing
//! store. Supports fault injection on deletes and reproduces the raw-listing
//! artifacts (`""`, `"."`) the fixture's exclusion set exists for.

use super::{
    ClientError, ConnectError, Connector, EntryRef, FsView, NamespaceClient, parse_service_ranks,
};
use crate::endpoint::EndpointIdentity;
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    File,
    Dir,
}

struct Node {
    kind: NodeKind,
    parent: Option<u64>,
    children: HashMap<String, u64>,
    data: Vec<u8>,
}

impl Node {
    fn dir(parent: Option<u64>) -> Self {
        Self {
            kind: NodeKind::Dir,
            parent,
            children: HashMap::new(),
            data: Vec::new(),
        }
    }

    fn file(parent: u64) -> Self {
        Self {
            kind: NodeKind::File,
            parent: Some(parent),
            children: HashMap::new(),
            data: Vec::new(),
        }
    }
}

fn norm_path(p: &str) -> String {
    let parts: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// One container's namespace tree.
struct Namespace {
    nodes: HashMap<u64, Node>,
    next_ino: u64,
    root: u64,
    fail_delete: HashSet<String>,
    emit_artifacts: bool,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(1, Node::dir(None));
        Self {
            nodes,
            next_ino: 2,
            root: 1,
            fail_delete: HashSet::new(),
            // The raw listing call reports the empty and self-reference
            // entries the way the real service does.
            emit_artifacts: true,
        }
    }

    fn alloc(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn lookup(&self, path: &str) -> Option<u64> {
        let mut cur = self.root;
        for part in path.split('/').filter(|s| !s.is_empty()) {
            cur = *self.nodes.get(&cur)?.children.get(part)?;
        }
        Some(cur)
    }

    fn mkdir_p(&mut self, path: &str) -> Result<u64, ClientError> {
        let mut cur = self.root;
        for part in path.split('/').filter(|s| !s.is_empty()) {
            if let Some(&next) = self.nodes[&cur].children.get(part) {
                if self.nodes[&next].kind != NodeKind::Dir {
                    return Err(ClientError::NotADirectory(part.to_string()));
                }
                cur = next;
                continue;
            }
            let ino = self.alloc();
            self.nodes.insert(ino, Node::dir(Some(cur)));
            self.nodes
                .get_mut(&cur)
                .expect("parent present")
                .children
                .insert(part.to_string(), ino);
            cur = ino;
        }
        Ok(cur)
    }

    fn create_file(&mut self, path: &str) -> Result<u64, ClientError> {
        let path = norm_path(path);
        let (dir, name) = match path.rfind('/') {
            Some(0) => ("/".to_string(), path[1..].to_string()),
            Some(n) => (path[..n].to_string(), path[n + 1..].to_string()),
            None => ("/".to_string(), path.clone()),
        };
        if name.is_empty() {
            return Err(ClientError::Backend("empty file name".to_string()));
        }
        let dir_ino = self.mkdir_p(&dir)?;
        if let Some(&ino) = self.nodes[&dir_ino].children.get(&name) {
            return match self.nodes[&ino].kind {
                NodeKind::File => Ok(ino),
                NodeKind::Dir => Err(ClientError::NotADirectory(name)),
            };
        }
        let ino = self.alloc();
        self.nodes.insert(ino, Node::file(dir_ino));
        self.nodes
            .get_mut(&dir_ino)
            .expect("parent present")
            .children
            .insert(name, ino);
        Ok(ino)
    }

    /// Detach a node from its parent and reclaim the whole subtree.
    fn remove_subtree(&mut self, ino: u64) {
        if let Some(parent) = self.nodes.get(&ino).and_then(|n| n.parent)
            && let Some(p) = self.nodes.get_mut(&parent)
        {
            p.children.retain(|_, v| *v != ino);
        }
        let mut stack = vec![ino];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.remove(&cur) {
                stack.extend(node.children.into_values());
            }
        }
    }
}

#[derive(Default)]
struct ClusterState {
    pools: HashMap<String, HashMap<String, Namespace>>,
    live_sessions: usize,
    session_peak: usize,
    delete_log: Vec<String>,
}

/// Shared handle to an in-memory cluster. Cheap to clone; all clones see the
/// same pools.
#[derive(Clone, Default)]
pub struct MemCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool/container pair if absent.
    pub fn create_container(&self, pool: &str, container: &str) {
        let mut st = self.state.lock().unwrap();
        st.pools
            .entry(pool.to_string())
            .or_default()
            .entry(container.to_string())
            .or_insert_with(Namespace::new);
    }

    /// Create the pool/container named by an identity.
    pub fn provision(&self, identity: &EndpointIdentity) {
        self.create_container(identity.pool_id(), identity.container_id());
    }

    /// Mark a root child as undeletable; deletes on it report failure.
    pub fn fail_delete_on(&self, identity: &EndpointIdentity, name: &str) {
        self.with_namespace(identity.pool_id(), identity.container_id(), |ns| {
            ns.fail_delete.insert(name.to_string());
        });
    }

    /// Toggle the `""`/`"."` entries in raw listings (on by default).
    pub fn set_listing_artifacts(&self, identity: &EndpointIdentity, on: bool) {
        self.with_namespace(identity.pool_id(), identity.container_id(), |ns| {
            ns.emit_artifacts = on;
        });
    }

    /// Handles opened via connect and not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.state.lock().unwrap().live_sessions
    }

    /// Highest number of simultaneously open handles observed.
    pub fn session_peak(&self) -> usize {
        self.state.lock().unwrap().session_peak
    }

    /// Every path a delete was issued for, in order.
    pub fn delete_log(&self) -> Vec<String> {
        self.state.lock().unwrap().delete_log.clone()
    }

    pub fn connector(&self) -> MemConnector {
        MemConnector {
            cluster: self.clone(),
        }
    }

    fn with_namespace<R>(
        &self,
        pool: &str,
        container: &str,
        f: impl FnOnce(&mut Namespace) -> R,
    ) -> Option<R> {
        let mut st = self.state.lock().unwrap();
        st.pools
            .get_mut(pool)
            .and_then(|p| p.get_mut(container))
            .map(f)
    }
}

#[derive(Clone)]
pub struct MemConnector {
    cluster: MemCluster,
}

impl MemConnector {
    fn check(&self, identity: &EndpointIdentity) -> Result<(), ConnectError> {
        parse_service_ranks(identity.service_ranks())?;
        let st = self.cluster.state.lock().unwrap();
        let pool = st
            .pools
            .get(identity.pool_id())
            .ok_or_else(|| ConnectError::PoolNotFound(identity.pool_id().to_string()))?;
        if !pool.contains_key(identity.container_id()) {
            return Err(ConnectError::ContainerNotFound {
                pool: identity.pool_id().to_string(),
                container: identity.container_id().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MemConnector {
    type Client = MemClient;
    type Fs = MemFsView;

    async fn connect(&self, identity: &EndpointIdentity) -> Result<Self::Client, ConnectError> {
        self.check(identity)?;
        {
            let mut st = self.cluster.state.lock().unwrap();
            st.live_sessions += 1;
            st.session_peak = st.session_peak.max(st.live_sessions);
        }
        debug!(
            "memfs connect pool={} container={}",
            identity.pool_id(),
            identity.container_id()
        );
        Ok(MemClient {
            cluster: self.cluster.clone(),
            pool: identity.pool_id().to_string(),
            container: identity.container_id().to_string(),
        })
    }

    async fn open_fs_view(&self, identity: &EndpointIdentity) -> Result<Self::Fs, ConnectError> {
        self.check(identity)?;
        Ok(MemFsView {
            cluster: self.cluster.clone(),
            pool: identity.pool_id().to_string(),
            container: identity.container_id().to_string(),
        })
    }
}

pub struct MemClient {
    cluster: MemCluster,
    pool: String,
    container: String,
}

impl MemClient {
    fn with_namespace<R>(&self, f: impl FnOnce(&mut Namespace) -> R) -> Result<R, ClientError> {
        self.cluster
            .with_namespace(&self.pool, &self.container, f)
            .ok_or_else(|| ClientError::Backend("container no longer present".to_string()))
    }
}

#[async_trait]
impl NamespaceClient for MemClient {
    async fn resolve(&self, path: &str) -> Result<EntryRef, ClientError> {
        let path = norm_path(path);
        let found = self.with_namespace(|ns| ns.lookup(&path).is_some())?;
        if found {
            Ok(EntryRef::new(path))
        } else {
            Err(ClientError::NotFound(path))
        }
    }

    async fn list_children(&self, entry: &EntryRef) -> Result<Vec<String>, ClientError> {
        self.with_namespace(|ns| {
            let ino = ns
                .lookup(entry.path())
                .ok_or_else(|| ClientError::NotFound(entry.path().to_string()))?;
            let node = &ns.nodes[&ino];
            if node.kind != NodeKind::Dir {
                return Err(ClientError::NotADirectory(entry.path().to_string()));
            }
            let mut names: Vec<String> = node.children.keys().cloned().collect();
            names.sort();
            if ns.emit_artifacts {
                let mut raw = vec![String::new(), ".".to_string()];
                raw.extend(names);
                return Ok(raw);
            }
            Ok(names)
        })?
    }

    async fn delete_recursive(
        &self,
        entry: &EntryRef,
        recursive: bool,
    ) -> Result<bool, ClientError> {
        let mut st = self.cluster.state.lock().unwrap();
        st.delete_log.push(entry.path().to_string());
        let ns = st
            .pools
            .get_mut(&self.pool)
            .and_then(|p| p.get_mut(&self.container))
            .ok_or_else(|| ClientError::Backend("container no longer present".to_string()))?;
        if ns.fail_delete.contains(leaf_name(entry.path())) {
            return Ok(false);
        }
        let Some(ino) = ns.lookup(entry.path()) else {
            return Ok(false);
        };
        if ino == ns.root {
            return Ok(false);
        }
        let node = &ns.nodes[&ino];
        if node.kind == NodeKind::Dir && !node.children.is_empty() && !recursive {
            return Ok(false);
        }
        ns.remove_subtree(ino);
        Ok(true)
    }

    async fn close(self) -> Result<(), ClientError> {
        let mut st = self.cluster.state.lock().unwrap();
        st.live_sessions = st.live_sessions.saturating_sub(1);
        Ok(())
    }
}

pub struct MemFsView {
    cluster: MemCluster,
    pool: String,
    container: String,
}

impl MemFsView {
    fn with_namespace<R>(&self, f: impl FnOnce(&mut Namespace) -> R) -> Result<R, ClientError> {
        self.cluster
            .with_namespace(&self.pool, &self.container, f)
            .ok_or_else(|| ClientError::Backend("container no longer present".to_string()))
    }
}

#[async_trait]
impl FsView for MemFsView {
    async fn mkdir_p(&self, path: &str) -> Result<(), ClientError> {
        let path = norm_path(path);
        self.with_namespace(|ns| ns.mkdir_p(&path).map(|_| ()))?
    }

    async fn create_file(&self, path: &str) -> Result<(), ClientError> {
        self.with_namespace(|ns| ns.create_file(path).map(|_| ()))?
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> Result<(), ClientError> {
        self.with_namespace(|ns| {
            let ino = ns.create_file(path)?;
            ns.nodes.get_mut(&ino).expect("node present").data = data.to_vec();
            Ok(())
        })?
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let path = norm_path(path);
        self.with_namespace(|ns| {
            let ino = ns
                .lookup(&path)
                .ok_or_else(|| ClientError::NotFound(path.clone()))?;
            let node = &ns.nodes[&ino];
            if node.kind != NodeKind::File {
                return Err(ClientError::Backend(format!("{path} is a directory")));
            }
            Ok(node.data.clone())
        })?
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let path = norm_path(path);
        self.with_namespace(|ns| {
            let ino = ns
                .lookup(&path)
                .ok_or_else(|| ClientError::NotFound(path.clone()))?;
            let node = &ns.nodes[&ino];
            if node.kind != NodeKind::Dir {
                return Err(ClientError::NotADirectory(path.clone()));
            }
            let mut names: Vec<String> = node.children.keys().cloned().collect();
            names.sort();
            Ok(names)
        })?
    }

    async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        let path = norm_path(path);
        self.with_namespace(|ns| ns.lookup(&path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MemCluster, EndpointIdentity) {
        let cluster = MemCluster::new();
        let identity = EndpointIdentity::scratch();
        cluster.provision(&identity);
        (cluster, identity)
    }

    #[tokio::test]
    async fn connect_rejects_unknown_pool_and_container() {
        let (cluster, identity) = seeded();
        let connector = cluster.connector();

        let bad_pool = EndpointIdentity::new("nope", identity.container_id());
        assert!(matches!(
            connector.connect(&bad_pool).await,
            Err(ConnectError::PoolNotFound(_))
        ));

        let bad_cont = identity.clone().with_container_id("nope");
        assert!(matches!(
            connector.connect(&bad_cont).await,
            Err(ConnectError::ContainerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn connect_rejects_malformed_service_ranks() {
        let (cluster, identity) = seeded();
        let connector = cluster.connector();
        let bad = identity.with_service_ranks("0,1");
        assert!(matches!(
            connector.connect(&bad).await,
            Err(ConnectError::InvalidServiceList { .. })
        ));
    }

    #[tokio::test]
    async fn raw_listing_carries_artifacts_but_readdir_does_not() {
        let (cluster, identity) = seeded();
        let connector = cluster.connector();
        let view = connector.open_fs_view(&identity).await.unwrap();
        view.mkdir_p("/a").await.unwrap();
        view.create_file("/b.txt").await.unwrap();

        let client = connector.connect(&identity).await.unwrap();
        let root = client.resolve("/").await.unwrap();
        let raw = client.list_children(&root).await.unwrap();
        assert_eq!(raw, vec!["", ".", "a", "b.txt"]);

        assert_eq!(view.readdir("/").await.unwrap(), vec!["a", "b.txt"]);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_recursive_reclaims_whole_subtree() {
        let (cluster, identity) = seeded();
        let connector = cluster.connector();
        let view = connector.open_fs_view(&identity).await.unwrap();
        view.mkdir_p("/a/b/c").await.unwrap();
        view.write_all("/a/b/f.txt", b"payload").await.unwrap();

        let client = connector.connect(&identity).await.unwrap();
        let entry = client.resolve("/a").await.unwrap();
        assert!(client.delete_recursive(&entry, true).await.unwrap());
        assert!(!view.exists("/a").await.unwrap());
        assert!(!view.exists("/a/b/f.txt").await.unwrap());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn nonrecursive_delete_refuses_populated_dir() {
        let (cluster, identity) = seeded();
        let connector = cluster.connector();
        let view = connector.open_fs_view(&identity).await.unwrap();
        view.create_file("/d/inner.txt").await.unwrap();

        let client = connector.connect(&identity).await.unwrap();
        let entry = client.resolve("/d").await.unwrap();
        assert!(!client.delete_recursive(&entry, false).await.unwrap());
        assert!(view.exists("/d/inner.txt").await.unwrap());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn injected_fault_reports_failed_delete() {
        let (cluster, identity) = seeded();
        cluster.fail_delete_on(&identity, "sticky");
        let connector = cluster.connector();
        let view = connector.open_fs_view(&identity).await.unwrap();
        view.mkdir_p("/sticky").await.unwrap();

        let client = connector.connect(&identity).await.unwrap();
        let entry = client.resolve("/sticky").await.unwrap();
        assert!(!client.delete_recursive(&entry, true).await.unwrap());
        assert!(view.exists("/sticky").await.unwrap());
        assert_eq!(cluster.delete_log(), vec!["/sticky"]);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_the_session() {
        let (cluster, identity) = seeded();
        let connector = cluster.connector();
        let a = connector.connect(&identity).await.unwrap();
        let b = connector.connect(&identity).await.unwrap();
        assert_eq!(cluster.live_sessions(), 2);
        a.close().await.unwrap();
        b.close().await.unwrap();
        assert_eq!(cluster.live_sessions(), 0);
        assert_eq!(cluster.session_peak(), 2);
    }

    #[tokio::test]
    async fn file_round_trip_through_the_view() {
        let (cluster, identity) = seeded();
        let view = cluster.connector().open_fs_view(&identity).await.unwrap();
        view.write_all("/x/y/data.bin", b"abc123").await.unwrap();
        assert_eq!(view.read_file("/x/y/data.bin").await.unwrap(), b"abc123");
    }
}
