//! Pool registry: the single source of truth mapping resource classes to
//! their admission pools.
//!
//! Built once at process start from [`AdmissionConfig`] and shared behind an
//! `Arc` by every component that calls downstream. No pools are added,
//! removed, or resized after construction; construction-time immutability is
//! the seam where dynamic limit tuning would land if it were ever added.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{AdmissionConfig, ConfigError};
use crate::pool::ResourcePool;
use crate::stats::RegistrySnapshot;

/// Downstream resource classes guarded by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Inbound chat request pipeline.
    Chat,
    /// LLM inference.
    Llm,
    /// Vector database search.
    VectorSearch,
    /// Translation service.
    Translation,
    /// Knowledge-graph retrieval service.
    GraphRetrieval,
    /// Tipping-point classifier.
    TippingPointClassifier,
}

impl PoolKind {
    /// All resource classes, in registry order.
    pub const ALL: [PoolKind; 6] = [
        PoolKind::Chat,
        PoolKind::Llm,
        PoolKind::VectorSearch,
        PoolKind::Translation,
        PoolKind::GraphRetrieval,
        PoolKind::TippingPointClassifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Llm => "llm",
            Self::VectorSearch => "vector_search",
            Self::Translation => "translation",
            Self::GraphRetrieval => "graph_retrieval",
            Self::TippingPointClassifier => "tipping_point_classifier",
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownPool(s.to_string()))
    }
}

/// Process-wide collection of admission pools, one per resource class.
#[derive(Debug)]
pub struct PoolRegistry {
    /// Indexed by `PoolKind as usize`, in `PoolKind::ALL` order.
    pools: Vec<ResourcePool>,
    default_timeout: Duration,
}

impl PoolRegistry {
    /// Build the registry, validating every limit and the default timeout.
    pub fn new(config: &AdmissionConfig) -> Result<Self, ConfigError> {
        let default_timeout = config.acquire_timeout()?;
        let mut pools = Vec::with_capacity(PoolKind::ALL.len());
        for kind in PoolKind::ALL {
            let limit = config.limit(kind);
            if limit.max == 0 {
                return Err(ConfigError::ZeroLimit { pool: kind });
            }
            pools.push(ResourcePool::new(kind, limit.max));
        }
        Ok(Self {
            pools,
            default_timeout,
        })
    }

    /// The pool guarding `kind`. Infallible: every resource class has a pool.
    pub fn pool(&self, kind: PoolKind) -> &ResourcePool {
        &self.pools[kind as usize]
    }

    /// Dynamic lookup for callers holding a pool name as a string.
    ///
    /// An unknown name is a wiring bug, not an operational condition:
    /// surface it, never retry it.
    pub fn pool_by_name(&self, name: &str) -> Result<&ResourcePool, ConfigError> {
        Ok(self.pool(name.parse()?))
    }

    /// Acquisition timeout applied when a guarded call does not override it.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Point-in-time view of every pool, for ops surfaces to serialize.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            pools: self.pools.iter().map(|p| p.snapshot()).collect(),
        }
    }
}
