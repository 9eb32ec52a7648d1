//! Endpoint identity: which pool/container the fixture binds to.
//!
//! Responsibilities:
//! - Resolve the pool id, container id and service rank list from environment
//!   overrides, falling back to fixed defaults.
//! - Hold the process-wide default identity, resolved exactly once.
//!
//! Resolution never fails; whether the identity points at a live
//! pool/container is checked on connect, not here.

use once_cell::sync::Lazy;
use std::env;
use uuid::Uuid;

pub const DEFAULT_POOL_ID: &str = "0417107c-144e-4394-a7f1-a281d0251b0c";
pub const DEFAULT_CONTAINER_ID: &str = "71bfbb65-5de6-4f85-88a5-e1a8b33af335";
pub const DEFAULT_SVC_RANKS: &str = "0";

/// Environment overrides, all optional.
pub const POOL_ID_ENV: &str = "RESETFS_POOL_ID";
pub const CONTAINER_ID_ENV: &str = "RESETFS_CONTAINER_ID";
pub const SVC_RANKS_ENV: &str = "RESETFS_SVC_RANKS";

static PROCESS_IDENTITY: Lazy<EndpointIdentity> = Lazy::new(EndpointIdentity::from_env);

/// A resolved pool+container address. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    pool_id: String,
    container_id: String,
    service_ranks: String,
}

impl EndpointIdentity {
    pub fn new(pool_id: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            container_id: container_id.into(),
            service_ranks: DEFAULT_SVC_RANKS.to_string(),
        }
    }

    /// Read overrides from the environment, defaulting the rest.
    pub fn from_env() -> Self {
        let pool_id = env::var(POOL_ID_ENV).unwrap_or_else(|_| DEFAULT_POOL_ID.to_string());
        let container_id =
            env::var(CONTAINER_ID_ENV).unwrap_or_else(|_| DEFAULT_CONTAINER_ID.to_string());
        let service_ranks =
            env::var(SVC_RANKS_ENV).unwrap_or_else(|_| DEFAULT_SVC_RANKS.to_string());
        Self {
            pool_id,
            container_id,
            service_ranks,
        }
    }

    /// The identity the process resolved on first use. Read-only afterwards;
    /// later environment changes are not observed.
    pub fn process_default() -> &'static EndpointIdentity {
        &PROCESS_IDENTITY
    }

    /// Fresh random pool/container ids for throwaway namespaces.
    pub fn scratch() -> Self {
        Self::new(Uuid::new_v4().to_string(), Uuid::new_v4().to_string())
    }

    pub fn with_pool_id(mut self, pool_id: impl Into<String>) -> Self {
        self.pool_id = pool_id.into();
        self
    }

    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = container_id.into();
        self
    }

    pub fn with_service_ranks(mut self, service_ranks: impl Into<String>) -> Self {
        self.service_ranks = service_ranks.into();
        self
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn service_ranks(&self) -> &str {
        &self.service_ranks
    }
}
