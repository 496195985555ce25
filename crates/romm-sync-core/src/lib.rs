//! # romm-sync-core
//!
//! Core library for mirroring a RomM game catalog into EmulationStation
//! `gamelist.xml` manifests.
//!
//! This crate provides the foundational functionality for:
//! - Resolving frontend layouts (RetroPie, ES-DE on Steam Deck)
//! - Authenticated, retrying access to the RomM API
//! - Diffing the remote catalog against previously synced manifests
//! - Idempotent, rate-limited downloads of cover art and ROMs
//! - Reading and writing `gamelist.xml`
//!
//! ## Modules
//!
//! - [`catalog`] - RomM API client and record types
//! - [`config`] - Persisted user defaults
//! - [`desired`] - Records resolved against a target layout
//! - [`error`] - Error types and Result alias
//! - [`http`] - HTTP transport seam and retry policy
//! - [`manifest`] - `gamelist.xml` reader and writer
//! - [`platform`] - RomM slug to local folder mapping
//! - [`sync`] - Reconciliation engine, asset fetcher and dry run
//! - [`target`] - Target profiles and path resolution
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use romm_sync_core::{
//!     Credentials, ReqwestTransport, SyncEngine, SyncOptions, TargetKind, TargetOverrides,
//!     TargetResolver,
//! };
//!
//! # fn main() -> romm_sync_core::Result<()> {
//! let target = TargetResolver::from_env()?.resolve(TargetKind::RetroPie, &TargetOverrides::default())?;
//! let engine = SyncEngine::builder()
//!     .transport(Arc::new(ReqwestTransport::new()?))
//!     .target(target)
//!     .options(SyncOptions::default().with_dry_run(true))
//!     .build()?;
//!
//! let report = engine.run("http://romm.local:8080", &Credentials::new("admin", "secret"))?;
//! println!("{} game(s) would be added", report.total_added());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod desired;
pub mod error;
pub mod http;
pub mod manifest;
pub mod platform;
pub mod sync;
pub mod target;
pub mod utils;

// Error types
pub use error::{Error, Result};

// Remote catalog
pub use catalog::{CatalogClient, CatalogRecord, Collection, Platform, Session};
pub use http::{Credentials, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RetryPolicy};

// Configuration and targets
pub use config::Config;
pub use target::{AssetNamingMode, TargetConfig, TargetKind, TargetOverrides, TargetResolver};

// Reconciliation
pub use desired::DesiredEntry;
pub use manifest::ManifestEntry;
pub use platform::map_slug;
pub use sync::{
    format_bytes, AssetFetcher, DryRunAction, DryRunItem, DryRunResult, FetchOutcome,
    PlatformReport, ProgressCallback, RateLimiter, RunReport, SyncEngine, SyncEngineBuilder,
    SyncMode, SyncOptions, SyncPhase, SyncPlan, SyncProgress,
};
