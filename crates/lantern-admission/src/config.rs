//! Admission configuration: per-service permit limits and the default
//! acquisition timeout.
//!
//! Resource classes are explicit named fields rather than a key-value map,
//! so a misspelled pool name is rejected when the config is parsed instead
//! of silently creating a pool nothing ever reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::PoolKind;

/// Permit limit for one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolLimit {
    /// Maximum number of concurrently held permits. Must be at least 1.
    pub max: usize,
}

/// Admission limits for every downstream resource class.
///
/// Defaults match the deployed service limits; deployments override them by
/// deserializing from the backend's config file. Limits are fixed for the
/// process lifetime once a registry is built from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AdmissionConfig {
    /// Default permit acquisition timeout in seconds. Guarded calls may
    /// override it per call.
    pub acquire_timeout_secs: f64,
    /// Inbound chat request pipeline.
    pub chat: PoolLimit,
    /// LLM inference.
    pub llm: PoolLimit,
    /// Vector database search.
    pub vector_search: PoolLimit,
    /// Translation service.
    pub translation: PoolLimit,
    /// Knowledge-graph retrieval service.
    pub graph_retrieval: PoolLimit,
    /// Tipping-point classifier.
    pub tipping_point_classifier: PoolLimit,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 30.0,
            chat: PoolLimit { max: 10 },
            llm: PoolLimit { max: 5 },
            vector_search: PoolLimit { max: 10 },
            translation: PoolLimit { max: 10 },
            graph_retrieval: PoolLimit { max: 8 },
            tipping_point_classifier: PoolLimit { max: 8 },
        }
    }
}

impl AdmissionConfig {
    /// Parse a config document from the backend's JSON config file.
    ///
    /// Unknown pool names and unknown limit fields are parse errors.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Limit configured for `pool`.
    pub fn limit(&self, pool: PoolKind) -> PoolLimit {
        match pool {
            PoolKind::Chat => self.chat,
            PoolKind::Llm => self.llm,
            PoolKind::VectorSearch => self.vector_search,
            PoolKind::Translation => self.translation,
            PoolKind::GraphRetrieval => self.graph_retrieval,
            PoolKind::TippingPointClassifier => self.tipping_point_classifier,
        }
    }

    /// Validated default acquisition timeout.
    pub fn acquire_timeout(&self) -> Result<Duration, ConfigError> {
        if !(self.acquire_timeout_secs > 0.0) {
            return Err(ConfigError::NonPositiveTimeout {
                seconds: self.acquire_timeout_secs,
            });
        }
        Duration::try_from_secs_f64(self.acquire_timeout_secs).map_err(|_| {
            ConfigError::NonPositiveTimeout {
                seconds: self.acquire_timeout_secs,
            }
        })
    }
}

/// Configuration errors are fatal: surfaced at startup, never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid admission config: {0}")]
    Parse(String),

    #[error("pool `{pool}` must allow at least one permit")]
    ZeroLimit { pool: PoolKind },

    #[error("acquire timeout must be a positive number of seconds, got {seconds}")]
    NonPositiveTimeout { seconds: f64 },

    #[error("unknown pool `{0}`")]
    UnknownPool(String),
}
