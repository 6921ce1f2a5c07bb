//! lantern-admission: bounded-concurrency admission control for Lantern's
//! downstream services.
//!
//! Every expensive downstream call in the chat backend (LLM inference,
//! vector search, translation, graph retrieval, the tipping-point
//! classifier, and the inbound chat pipeline itself) goes through a named
//! admission pool:
//!
//! 1. The caller acquires a permit from the pool for its resource class,
//!    waiting in strict FIFO order up to a timeout.
//! 2. On overload the caller surfaces "system busy" to the user; this layer
//!    never retries on its own.
//! 3. The permit is released on every exit path: return, error, panic, and
//!    cancellation.
//!
//! Pools are built once at startup from [`AdmissionConfig`] into a
//! [`PoolRegistry`] and shared behind an `Arc`;
//! [`PoolRegistry::guarded`] is the integration point for callers.

mod config;
mod guard;
mod pool;
mod registry;
mod stats;

pub use config::{AdmissionConfig, ConfigError, PoolLimit};
pub use guard::{GuardError, GuardOptions};
pub use pool::{AcquireOutcome, PermitHandle, ResourcePool};
pub use registry::{PoolKind, PoolRegistry};
pub use stats::{PoolSnapshot, RegistrySnapshot};

pub use tokio_util::sync::CancellationToken;
