//! Root-namespace reset: list one level, delete every non-reserved subtree.

use crate::client::{ClientError, NamespaceClient};
use log::{info, warn};
use std::collections::HashSet;
use thiserror::Error;

/// Child names the reset never touches. The defaults are the structural
/// artifacts of the raw listing call, not real entries.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    names: HashSet<String>,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        let mut names = HashSet::new();
        names.insert(String::new());
        names.insert(".".to_string());
        Self { names }
    }
}

impl ExclusionSet {
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) -> &mut Self {
        self.names.insert(name.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Failure before any deletion could start; per-entry failures never raise.
#[derive(Debug, Error)]
pub enum ResetError {
    #[error("resolving root directory failed: {0}")]
    ResolveRoot(#[source] ClientError),
    #[error("listing root directory failed: {0}")]
    ListRoot(#[source] ClientError),
}

#[derive(Debug, Clone)]
pub struct ResetFailure {
    pub name: String,
    pub reason: String,
}

/// What a reset actually did, entry by entry.
#[derive(Debug, Default)]
pub struct ResetReport {
    pub deleted: Vec<String>,
    pub failed: Vec<ResetFailure>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every non-reserved child of `"/"`, one subtree at a time.
///
/// Children are processed strictly in listing order; a failed deletion is
/// logged, recorded in the report and never aborts the remaining siblings.
/// The borrowed handle stays open and with the caller.
pub async fn reset_root_namespace<C: NamespaceClient>(
    client: &C,
    exclusions: &ExclusionSet,
) -> Result<ResetReport, ResetError> {
    let root = client.resolve("/").await.map_err(ResetError::ResolveRoot)?;
    let children = client
        .list_children(&root)
        .await
        .map_err(ResetError::ListRoot)?;

    let mut report = ResetReport::default();
    for child in children {
        if exclusions.contains(&child) {
            continue;
        }
        let path = format!("/{child}");
        match delete_subtree(client, &path).await {
            Ok(true) => {
                info!("deleted {path}");
                report.deleted.push(child);
            }
            Ok(false) => {
                warn!("failed to delete {path}");
                report.failed.push(ResetFailure {
                    name: child,
                    reason: "backend refused the deletion".to_string(),
                });
            }
            Err(e) => {
                warn!("failed to delete {path}: {e}");
                report.failed.push(ResetFailure {
                    name: child,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

async fn delete_subtree<C: NamespaceClient>(client: &C, path: &str) -> Result<bool, ClientError> {
    let entry = client.resolve(path).await?;
    client.delete_recursive(&entry, true).await
}
