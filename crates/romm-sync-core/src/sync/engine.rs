//! Main synchronization engine

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{CatalogClient, Platform, Session};
use crate::desired::{self, DesiredEntry};
use crate::error::{Error, Result};
use crate::http::{Credentials, HttpTransport, RetryPolicy};
use crate::manifest::{self, ManifestEntry};
use crate::sync::dry_run::{DryRunAction, DryRunItem, DryRunResult};
use crate::sync::fetcher::{
    binary_request, cover_request, AssetFetcher, DeleteOutcome, FetchOutcome, RateLimiter,
};
use crate::sync::plan::{diff, SyncMode, SyncPlan};
use crate::target::TargetConfig;
use crate::utils::reference_file_name;

/// What a run does
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub download_images: bool,
    pub download_binaries: bool,
    /// Compute and report the plan without writing anything
    pub dry_run: bool,
    /// Remote platform slugs to sync; empty means all
    pub platforms: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Favorites,
            download_images: true,
            download_binaries: false,
            dry_run: false,
            platforms: Vec::new(),
        }
    }
}

impl SyncOptions {
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_images(mut self, enabled: bool) -> Self {
        self.download_images = enabled;
        self
    }

    pub fn with_binaries(mut self, enabled: bool) -> Self {
        self.download_binaries = enabled;
        self
    }

    pub fn with_dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }
}

/// Download counters for one kind of asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub downloaded: usize,
    pub present: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl TransferStats {
    fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Downloaded { bytes } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            FetchOutcome::AlreadyPresent => self.present += 1,
            FetchOutcome::Unavailable => self.unavailable += 1,
            FetchOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// A failure confined to one game
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub identity_key: String,
    pub message: String,
}

impl ItemError {
    pub fn new(identity_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identity_key: identity_key.into(),
            message: message.into(),
        }
    }
}

/// Outcome of syncing one platform
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlatformReport {
    pub slug: String,
    pub name: String,
    /// Local folder name
    pub folder: String,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    /// Entries kept although absent from the catalog (full mode)
    pub retained: usize,
    pub images: TransferStats,
    pub binaries: TransferStats,
    pub files_deleted: usize,
    /// Set when the manifest was written
    pub manifest_written: Option<PathBuf>,
    pub errors: Vec<ItemError>,
}

impl PlatformReport {
    fn from_plan(platform: &Platform, plan: &SyncPlan) -> Self {
        let keys = |keys: Vec<&str>| -> Vec<String> { keys.into_iter().map(str::to_string).collect() };
        Self {
            slug: platform.slug.clone(),
            name: platform.display_name().to_string(),
            folder: platform.folder_name().to_string(),
            added: keys(plan.add_keys()),
            updated: keys(plan.update_keys()),
            removed: keys(plan.remove_keys()),
            unchanged: plan.unchanged.len(),
            retained: plan.retained.len(),
            ..Default::default()
        }
    }

    /// Entries in the manifest after the sync
    pub fn total_entries(&self) -> usize {
        self.added.len() + self.updated.len() + self.unchanged + self.retained
    }
}

/// A platform that failed as a whole
#[derive(Debug, Clone, Serialize)]
pub struct PlatformFailure {
    pub slug: String,
    pub message: String,
}

/// Result of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: SyncMode,
    pub dry_run: bool,
    pub platforms: Vec<PlatformReport>,
    pub failures: Vec<PlatformFailure>,
    /// Present for dry runs
    pub preview: Option<DryRunResult>,
    /// Network fetches performed
    pub downloads: u32,
    pub rate_limit_pauses: u32,
}

impl RunReport {
    fn new(mode: SyncMode, dry_run: bool) -> Self {
        Self {
            mode,
            dry_run,
            platforms: Vec::new(),
            failures: Vec::new(),
            preview: None,
            downloads: 0,
            rate_limit_pauses: 0,
        }
    }

    /// Number of platforms attempted
    pub fn selected(&self) -> usize {
        self.platforms.len() + self.failures.len()
    }

    /// `false` only when every selected platform failed
    pub fn exit_ok(&self) -> bool {
        self.failures.is_empty() || !self.platforms.is_empty()
    }

    /// Aggregate error for failed platforms, if any
    pub fn partial_failure(&self) -> Option<Error> {
        if self.failures.is_empty() {
            None
        } else {
            Some(Error::PartialSync {
                failed: self.failures.len(),
                total: self.selected(),
            })
        }
    }

    pub fn total_added(&self) -> usize {
        self.platforms.iter().map(|p| p.added.len()).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.platforms.iter().map(|p| p.updated.len()).sum()
    }

    pub fn total_removed(&self) -> usize {
        self.platforms.iter().map(|p| p.removed.len()).sum()
    }

    pub fn total_item_errors(&self) -> usize {
        self.platforms.iter().map(|p| p.errors.len()).sum()
    }

    /// Bytes downloaded across all platforms
    pub fn total_bytes(&self) -> u64 {
        self.platforms
            .iter()
            .map(|p| p.images.bytes + p.binaries.bytes)
            .sum()
    }
}

/// Progress information for sync callbacks
#[derive(Debug, Clone, Default)]
pub struct SyncProgress {
    /// Current item (platform index, or game index while downloading)
    pub current: usize,
    /// Total items in the current phase
    pub total: usize,
    /// Remote slug of the platform being processed
    pub platform: String,
    /// Title of the current game, if any
    pub current_name: String,
    pub phase: SyncPhase,
}

/// Phase of the sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// Authenticating and listing platforms
    #[default]
    Connecting,
    /// Listing one platform's records
    Listing,
    /// Deleting files of removed entries
    Removing,
    /// Downloading artwork and binaries
    Downloading,
    /// Writing the manifest
    Writing,
    /// Sync complete
    Complete,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Listing => write!(f, "Listing"),
            Self::Removing => write!(f, "Removing"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Writing => write!(f, "Writing gamelist"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Files to delete for one removed manifest entry
struct Removal<'a> {
    entry: &'a ManifestEntry,
    paths: Vec<PathBuf>,
}

/// Main synchronization engine
pub struct SyncEngine {
    transport: Arc<dyn HttpTransport>,
    target: TargetConfig,
    options: SyncOptions,
    listing_retry: RetryPolicy,
    asset_retry: RetryPolicy,
    rate_limiter: RateLimiter,
    progress_callback: Option<ProgressCallback>,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(transport: Arc<dyn HttpTransport>, target: TargetConfig, options: SyncOptions) -> Self {
        Self {
            transport,
            target,
            options,
            listing_retry: RetryPolicy::listing(),
            asset_retry: RetryPolicy::asset(),
            rate_limiter: RateLimiter::default(),
            progress_callback: None,
        }
    }

    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    /// Set the progress callback
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Retry policy for catalog listings
    pub fn with_listing_retry(mut self, retry: RetryPolicy) -> Self {
        self.listing_retry = retry;
        self
    }

    /// Retry policy for image and binary downloads
    pub fn with_asset_retry(mut self, retry: RetryPolicy) -> Self {
        self.asset_retry = retry;
        self
    }

    /// Rate limiter template; each run starts from a fresh count
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Report progress to the callback if set
    fn report_progress(&self, progress: SyncProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    /// Run one reconciliation pass against the server.
    ///
    /// Authentication, configuration and a missing favorites collection
    /// abort the run. Any other failure is confined to its platform and
    /// recorded in the report.
    pub fn run(&self, server_url: &str, credentials: &Credentials) -> Result<RunReport> {
        let client =
            CatalogClient::new(Arc::clone(&self.transport)).with_retry_policy(self.listing_retry);

        self.report_progress(SyncProgress::default());
        let session = client.authenticate(server_url, &credentials.username, &credentials.password)?;
        let platforms = self.select_platforms(client.list_platforms(&session)?)?;

        tracing::info!(
            "Syncing {} platform(s) in {} mode{}",
            platforms.len(),
            self.options.mode,
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        if self.options.mode.favorites_only() {
            client.favorites_collection_id(&session)?;
        }

        let kid_ids = match client.kid_friendly_ids(&session) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Could not load kid-friendly collection: {}", e);
                HashSet::new()
            }
        };

        let mut fetcher = AssetFetcher::new(Arc::clone(&self.transport))
            .with_retry_policy(self.asset_retry)
            .with_rate_limiter(self.rate_limiter.clone());
        let mut report = RunReport::new(self.options.mode, self.options.dry_run);
        let mut preview = DryRunResult::new();
        let total = platforms.len();

        for (index, platform) in platforms.iter().enumerate() {
            self.report_progress(SyncProgress {
                current: index + 1,
                total,
                platform: platform.slug.clone(),
                current_name: platform.display_name().to_string(),
                phase: SyncPhase::Listing,
            });

            match self.sync_platform(&client, &session, platform, &kid_ids, &mut fetcher, &mut preview) {
                Ok(platform_report) => report.platforms.push(platform_report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!("Platform {} failed: {}", platform.slug, e);
                    report.failures.push(PlatformFailure {
                        slug: platform.slug.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report.downloads = fetcher.rate_limiter().count();
        report.rate_limit_pauses = fetcher.rate_limiter().pauses();
        if self.options.dry_run {
            report.preview = Some(preview);
        }

        self.report_progress(SyncProgress {
            current: total,
            total,
            phase: SyncPhase::Complete,
            ..Default::default()
        });

        Ok(report)
    }

    /// Apply the platform filter; an empty selection is a configuration error
    fn select_platforms(&self, available: Vec<Platform>) -> Result<Vec<Platform>> {
        if self.options.platforms.is_empty() {
            return Ok(available);
        }

        let wanted: HashSet<String> = self
            .options
            .platforms
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        for slug in &wanted {
            if !available.iter().any(|p| p.slug.eq_ignore_ascii_case(slug)) {
                tracing::warn!("Platform '{}' not found on server", slug);
            }
        }

        let selected: Vec<Platform> = available
            .into_iter()
            .filter(|p| wanted.contains(&p.slug.to_lowercase()))
            .collect();

        if selected.is_empty() {
            let mut names: Vec<String> = wanted.into_iter().collect();
            names.sort_unstable();
            return Err(Error::UnknownPlatforms(names));
        }

        Ok(selected)
    }

    fn sync_platform(
        &self,
        client: &CatalogClient,
        session: &Session,
        platform: &Platform,
        kid_ids: &HashSet<i64>,
        fetcher: &mut AssetFetcher,
        preview: &mut DryRunResult,
    ) -> Result<PlatformReport> {
        let folder = platform.folder_name();
        let manifest_path = self.target.manifest_path(folder);
        tracing::info!(
            "Platform {} ({}) -> {}",
            platform.slug,
            platform.display_name(),
            folder
        );

        let existing = manifest::read(&manifest_path)?;
        let manifest_exists = manifest_path.exists();
        let records = client.list_records(session, platform, self.options.mode.favorites_only())?;
        tracing::info!(
            "{}: {} record(s) listed, {} previously synced",
            platform.slug,
            records.len(),
            existing.len()
        );

        let desired = desired::build(records, folder, &self.target, kid_ids);
        let plan = diff(existing, desired, self.options.mode);
        let removals = self.removals(&plan, folder);
        let write_manifest = plan.has_changes() || (!manifest_exists && !plan.manifest.is_empty());

        tracing::info!(
            "{}: {} to add, {} to update, {} to remove, {} unchanged",
            platform.slug,
            plan.to_add.len(),
            plan.to_update.len(),
            plan.to_remove.len(),
            plan.unchanged.len()
        );

        let mut report = PlatformReport::from_plan(platform, &plan);

        if self.options.dry_run {
            self.preview_platform(platform, &plan, &removals, preview);
            if write_manifest {
                preview.manifests_to_write.push(manifest_path);
            }
            return Ok(report);
        }

        self.apply_removals(platform, &removals, fetcher, &mut report);
        self.fetch_assets(platform, &plan, session, fetcher, &mut report);

        if write_manifest {
            self.report_progress(SyncProgress {
                platform: platform.slug.clone(),
                phase: SyncPhase::Writing,
                ..Default::default()
            });
            manifest::write(&manifest_path, &plan.manifest)?;
            tracing::info!(
                "{}: wrote {} entries to {}",
                platform.slug,
                plan.manifest.len(),
                manifest_path.display()
            );
            report.manifest_written = Some(manifest_path);
        }

        Ok(report)
    }

    /// Binary and artwork files of removed entries.
    ///
    /// Only file names are taken from the manifest; they are resolved
    /// inside the platform's own directories. Files still referenced by a
    /// desired entry are never deleted.
    fn removals<'a>(&self, plan: &'a SyncPlan, folder: &str) -> Vec<Removal<'a>> {
        let protected: HashSet<&Path> = plan
            .desired()
            .flat_map(|e| std::iter::once(e.binary_path.as_path()).chain(e.asset_path.as_deref()))
            .collect();
        let binary_dir = self.target.binary_dir(folder);
        let asset_dir = self.target.asset_dir(folder);

        plan.to_remove
            .iter()
            .map(|entry| {
                let mut paths = Vec::new();
                if let Some(name) = reference_file_name(&entry.path) {
                    paths.push(binary_dir.join(name));
                }
                if let Some(name) = entry.image.as_deref().and_then(reference_file_name) {
                    paths.push(asset_dir.join(name));
                }
                paths.retain(|p| !protected.contains(p.as_path()) && self.target.is_managed_path(p));
                Removal { entry, paths }
            })
            .collect()
    }

    fn apply_removals(
        &self,
        platform: &Platform,
        removals: &[Removal<'_>],
        fetcher: &AssetFetcher,
        report: &mut PlatformReport,
    ) {
        for (index, removal) in removals.iter().enumerate() {
            self.report_progress(SyncProgress {
                current: index + 1,
                total: removals.len(),
                platform: platform.slug.clone(),
                current_name: removal.entry.name.clone(),
                phase: SyncPhase::Removing,
            });
            tracing::info!(
                "{}: removing '{}' ({})",
                platform.slug,
                removal.entry.name,
                removal.entry.identity_key
            );

            for path in &removal.paths {
                match fetcher.delete(path) {
                    DeleteOutcome::Deleted => report.files_deleted += 1,
                    DeleteOutcome::AlreadyAbsent => {}
                    DeleteOutcome::Failed(message) => report
                        .errors
                        .push(ItemError::new(&removal.entry.identity_key, message)),
                }
            }
        }
    }

    fn fetch_assets(
        &self,
        platform: &Platform,
        plan: &SyncPlan,
        session: &Session,
        fetcher: &mut AssetFetcher,
        report: &mut PlatformReport,
    ) {
        if !self.options.download_images && !self.options.download_binaries {
            return;
        }

        let entries: Vec<&DesiredEntry> = plan.desired().collect();
        let total = entries.len();

        for (index, entry) in entries.into_iter().enumerate() {
            self.report_progress(SyncProgress {
                current: index + 1,
                total,
                platform: platform.slug.clone(),
                current_name: entry.record.title.clone(),
                phase: SyncPhase::Downloading,
            });

            if self.options.download_images {
                if let (Some(dest), Some(request)) =
                    (entry.asset_path.as_deref(), cover_request(session, &entry.record))
                {
                    if self.is_writable(platform, entry, dest, "image", report) {
                        let outcome = fetcher.fetch_image(&request, dest);
                        report.images.record(&outcome);
                        if let FetchOutcome::Failed(message) = outcome {
                            report
                                .errors
                                .push(ItemError::new(&entry.identity_key, format!("image: {}", message)));
                        }
                    }
                }
            }

            if self.options.download_binaries
                && self.is_writable(platform, entry, &entry.binary_path, "binary", report)
            {
                let request = binary_request(session, &entry.record);
                let outcome = fetcher.fetch_binary(&request, &entry.binary_path);
                report.binaries.record(&outcome);
                match outcome {
                    FetchOutcome::Failed(message) => report
                        .errors
                        .push(ItemError::new(&entry.identity_key, format!("binary: {}", message))),
                    FetchOutcome::Unavailable => {
                        tracing::warn!("{}: no binary available for '{}'", platform.slug, entry.record.title)
                    }
                    _ => {}
                }
            }
        }
    }

    /// Refuses destinations outside the target roots, recording an item error
    fn is_writable(
        &self,
        platform: &Platform,
        entry: &DesiredEntry,
        dest: &Path,
        what: &str,
        report: &mut PlatformReport,
    ) -> bool {
        if self.target.is_managed_path(dest) {
            return true;
        }
        tracing::warn!(
            "{}: refusing to write {} for '{}' outside managed roots: {}",
            platform.slug,
            what,
            entry.record.title,
            dest.display()
        );
        report.errors.push(ItemError::new(
            &entry.identity_key,
            format!("{}: destination outside managed roots: {}", what, dest.display()),
        ));
        false
    }

    /// Record what a real run would do, from the same plan
    fn preview_platform(
        &self,
        platform: &Platform,
        plan: &SyncPlan,
        removals: &[Removal<'_>],
        preview: &mut DryRunResult,
    ) {
        let groups = [
            (&plan.to_add, DryRunAction::Add),
            (&plan.to_update, DryRunAction::Update),
            (&plan.unchanged, DryRunAction::Unchanged),
        ];

        for (entries, action) in groups {
            for entry in entries {
                let mut item = DryRunItem::new(&platform.slug, &entry.identity_key, &entry.record.title, action);
                item.downloads_image = self.options.download_images
                    && entry.asset_path.as_deref().map_or(false, |p| !p.exists());
                item.downloads_binary = self.options.download_binaries && !entry.binary_path.exists();
                if item.downloads_binary {
                    item.size_bytes = entry.record.file_size_bytes.unwrap_or(0);
                }
                preview.add_item(item);
            }
        }

        for removal in removals {
            let mut item = DryRunItem::new(
                &platform.slug,
                &removal.entry.identity_key,
                &removal.entry.name,
                DryRunAction::Remove,
            );
            item.deletes = removal.paths.iter().filter(|p| p.exists()).cloned().collect();
            preview.add_item(item);
        }
    }
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    transport: Option<Arc<dyn HttpTransport>>,
    target: Option<TargetConfig>,
    options: SyncOptions,
    listing_retry: RetryPolicy,
    asset_retry: RetryPolicy,
    rate_limiter: RateLimiter,
    progress_callback: Option<ProgressCallback>,
}

impl SyncEngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            transport: None,
            target: None,
            options: SyncOptions::default(),
            listing_retry: RetryPolicy::listing(),
            asset_retry: RetryPolicy::asset(),
            rate_limiter: RateLimiter::default(),
            progress_callback: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn target(mut self, target: TargetConfig) -> Self {
        self.target = Some(target);
        self
    }

    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn listing_retry(mut self, retry: RetryPolicy) -> Self {
        self.listing_retry = retry;
        self
    }

    pub fn asset_retry(mut self, retry: RetryPolicy) -> Self {
        self.asset_retry = retry;
        self
    }

    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Set the progress callback
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Build the sync engine
    pub fn build(self) -> Result<SyncEngine> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Config("HTTP transport is required".to_string()))?;

        let target = self
            .target
            .ok_or_else(|| Error::Config("Target configuration is required".to_string()))?;

        let mut engine = SyncEngine::new(transport, target, self.options)
            .with_listing_retry(self.listing_retry)
            .with_asset_retry(self.asset_retry)
            .with_rate_limiter(self.rate_limiter);

        if let Some(callback) = self.progress_callback {
            engine = engine.with_progress_callback(callback);
        }

        Ok(engine)
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
