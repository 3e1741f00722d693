//! gridscout - priority-scheduled driver profile resolution
//!
//! This library resolves batches of independently keyed driver-profile
//! lookups against a slow, rate-limited remote endpoint under a bounded
//! concurrency budget. Lookups are prioritized by runtime visibility,
//! deduplicated to one in-flight fetch per key, cached with a TTL,
//! retried on transient failures, deferred under memory pressure, and
//! delivered to their consumers the moment each one resolves.
//!
//! # High-Level API
//!
//! The [`engine`] module provides the facade most callers want:
//!
//! ```ignore
//! use gridscout::config::EngineConfig;
//! use gridscout::engine::ProfileEngine;
//! use gridscout::provider::{
//!     MemberProfileProvider, ProviderConfig, ReqwestHttpClient, StaticTokenSource,
//! };
//! use std::sync::Arc;
//!
//! let provider = Arc::new(MemberProfileProvider::new(
//!     ReqwestHttpClient::new()?,
//!     StaticTokenSource::new(token),
//!     ProviderConfig::default(),
//! ));
//! let engine = ProfileEngine::new(provider, EngineConfig::default());
//!
//! engine.register("Alice Example", &consumer);
//! engine.submit(vec!["Alice Example".to_string()]);
//! ```

pub mod cache;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod metrics;
pub mod priority;
pub mod profile;
pub mod provider;
pub mod scheduler;
pub mod singleflight;

/// Version of the gridscout library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
