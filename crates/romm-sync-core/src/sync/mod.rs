//! Reconciliation of the remote catalog with local manifests

mod dry_run;
mod engine;
mod fetcher;
mod plan;

pub use dry_run::{format_bytes, DryRunAction, DryRunItem, DryRunResult};
pub use engine::{
    ItemError, PlatformFailure, PlatformReport, ProgressCallback, RunReport, SyncEngine,
    SyncEngineBuilder, SyncOptions, SyncPhase, SyncProgress, TransferStats,
};
pub use fetcher::{
    binary_request, cover_request, AssetFetcher, DeleteOutcome, FetchOutcome, RateLimiter,
    BINARY_TIMEOUT, IMAGE_TIMEOUT, RATE_LIMIT_EVERY, RATE_LIMIT_PAUSE,
};
pub use plan::{diff, SyncMode, SyncPlan};
