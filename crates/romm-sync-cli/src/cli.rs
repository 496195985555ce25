//! Command-line parsing, option merging and result rendering
//!
//! Usage:
//!   romm-sync [sync] [options]      Sync favorites (or everything with --all-roms)
//!   romm-sync platforms [options]   List server platforms and their local folders

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};

use romm_sync_core::catalog::CatalogClient;
use romm_sync_core::config::Config;
use romm_sync_core::platform::is_known_slug;
use romm_sync_core::sync::{DryRunAction, DryRunResult, RunReport, SyncMode, SyncOptions, SyncProgress};
use romm_sync_core::{
    Credentials, ReqwestTransport, SyncEngine, TargetKind, TargetOverrides, TargetResolver,
};

/// Mirror a RomM catalog into EmulationStation gamelists
#[derive(Debug, Parser)]
#[command(name = "romm-sync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub sync: SyncArgs,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Command to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum CliCommand {
    /// Reconcile the catalog with local gamelists (default)
    Sync,
    /// List platforms on the server and the local folder each maps to
    Platforms,
}

/// Server and account options
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// RomM server URL
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// RomM username
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// RomM password
    #[arg(short, long, env = "ROMM_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Frontend layout: retropie or steamdeck
    #[arg(long, global = true)]
    pub target: Option<TargetKind>,

    /// Remember server, user, target and platforms as defaults
    #[arg(long, global = true)]
    pub save_defaults: bool,
}

/// Options that shape a sync run
#[derive(Debug, Clone, Default, Args)]
pub struct SyncArgs {
    /// Gamelist root (overrides the target default)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// ROM root; gamelists then reference ROMs by absolute path
    #[arg(long, global = true)]
    pub rom_path: Option<PathBuf>,

    /// Artwork root (overrides the target default)
    #[arg(long, global = true)]
    pub media_path: Option<PathBuf>,

    /// Comma-separated platform slugs to sync (default: all)
    #[arg(long, value_delimiter = ',', global = true)]
    pub platforms: Vec<String>,

    /// Skip downloading cover images
    #[arg(long, global = true)]
    pub no_images: bool,

    /// Download ROM files from the server
    #[arg(long, global = true)]
    pub download_roms: bool,

    /// Sync every game instead of only favorites; never removes entries
    #[arg(long, global = true)]
    pub all_roms: bool,

    /// Show what would be done without changing anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Do not read ES-DE settings; use explicit paths only
    #[arg(long, global = true)]
    pub no_auto_detect: bool,
}

impl SyncArgs {
    /// Path overrides for the target resolver
    pub fn overrides(&self) -> TargetOverrides {
        TargetOverrides {
            manifest_root: self.output.clone(),
            asset_root: self.media_path.clone(),
            binary_root: self.rom_path.clone(),
            use_absolute_binary_paths: self.rom_path.as_ref().map(|_| true),
            disable_auto_detect: self.no_auto_detect,
        }
    }

    /// Engine options; `platforms` is the already merged platform filter
    pub fn sync_options(&self, platforms: Vec<String>) -> SyncOptions {
        let mode = if self.all_roms {
            SyncMode::Full
        } else {
            SyncMode::Favorites
        };

        SyncOptions::default()
            .with_mode(mode)
            .with_images(!self.no_images)
            .with_binaries(self.download_roms)
            .with_dry_run(self.dry_run)
            .with_platforms(platforms)
    }
}

/// Flags merged over persisted defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub target: TargetKind,
    pub platforms: Vec<String>,
}

impl Settings {
    /// Merge flags over `config`; flags always win
    pub fn resolve(connection: &ConnectionArgs, sync: &SyncArgs, config: &Config) -> anyhow::Result<Self> {
        let server_url = connection
            .server
            .clone()
            .or_else(|| config.server_url.clone())
            .filter(|s| !s.trim().is_empty());
        let Some(server_url) = server_url else {
            bail!("No server configured. Pass --server or save one with --save-defaults");
        };

        let username = connection
            .user
            .clone()
            .or_else(|| config.username.clone())
            .filter(|s| !s.is_empty());
        let Some(username) = username else {
            bail!("No username configured. Pass --user");
        };

        let Some(password) = connection.password.clone() else {
            bail!("No password given. Pass --password or set ROMM_PASSWORD");
        };

        let platforms = if sync.platforms.is_empty() {
            config.platforms.clone()
        } else {
            sync.platforms
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };

        Ok(Self {
            server_url,
            username,
            password,
            target: connection.target.unwrap_or(config.target),
            platforms,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    /// Defaults to persist; never includes the password
    pub fn to_config(&self) -> Config {
        Config {
            server_url: Some(self.server_url.clone()),
            username: Some(self.username.clone()),
            target: self.target,
            platforms: self.platforms.clone(),
        }
    }
}

/// Run the selected command
pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::resolve(&cli.connection, &cli.sync, &Config::load())?;

    if cli.connection.save_defaults {
        match settings.to_config().save()? {
            Some(path) => eprintln!("Saved defaults to {}", path.display()),
            None => eprintln!("Warning: no config directory; defaults not saved"),
        }
    }

    match cli.command.unwrap_or(CliCommand::Sync) {
        CliCommand::Sync => run_sync(&settings, &cli.sync, cli.json),
        CliCommand::Platforms => run_platforms(&settings, cli.json),
    }
}

fn run_sync(settings: &Settings, args: &SyncArgs, json: bool) -> anyhow::Result<ExitCode> {
    let target = TargetResolver::from_env()?.resolve(settings.target, &args.overrides())?;
    let options = args.sync_options(settings.platforms.clone());

    if !json {
        println!("Target:    {}", settings.target.display_name());
        println!("Gamelists: {}", target.manifest_root.display());
        println!("Artwork:   {}", target.asset_root.display());
        if options.download_binaries {
            println!("ROMs:      {}", target.binary_root.display());
        }
        println!("Mode:      {}{}", options.mode, if options.dry_run { " (dry run)" } else { "" });
        println!();
    }

    let show_progress = !json;
    let progress_callback: Box<dyn Fn(SyncProgress) + Send + Sync> = if show_progress {
        Box::new(|progress: SyncProgress| {
            if progress.total > 0 && !progress.current_name.is_empty() {
                eprint!(
                    "\r\x1b[K{} {}: {}/{} - {}",
                    progress.phase, progress.platform, progress.current, progress.total, progress.current_name
                );
            }
        })
    } else {
        Box::new(|_| {})
    };

    let engine = SyncEngine::builder()
        .transport(Arc::new(ReqwestTransport::new()?))
        .target(target)
        .options(options)
        .progress_callback(progress_callback)
        .build()?;

    let report = engine.run(&settings.server_url, &settings.credentials())?;

    if show_progress {
        eprint!("\r\x1b[K");
    }

    match report.preview {
        Some(ref preview) => print_dry_run_result(preview, &report, json)?,
        None => print_sync_result(&report, json)?,
    }

    if let Some(err) = report.partial_failure() {
        tracing::warn!("{}", err);
    }

    Ok(if report.exit_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_platforms(settings: &Settings, json: bool) -> anyhow::Result<ExitCode> {
    let client = CatalogClient::new(Arc::new(ReqwestTransport::new()?));
    let session = client.authenticate(&settings.server_url, &settings.username, &settings.password)?;
    let mut platforms = client
        .list_platforms(&session)
        .context("Failed to list platforms")?;
    platforms.sort_by(|a, b| a.slug.cmp(&b.slug));

    if json {
        let items: Vec<_> = platforms
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "slug": p.slug,
                    "name": p.display_name(),
                    "folder": p.folder_name(),
                    "known": is_known_slug(&p.slug),
                    "rom_count": p.rom_count,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} platform(s) on {}:", platforms.len(), session.server_url());
    println!();
    println!("  {:<16} {:<16} {:>6}  NAME", "SLUG", "FOLDER", "ROMS");
    for p in &platforms {
        let marker = if is_known_slug(&p.slug) { "" } else { " (unmapped)" };
        println!(
            "  {:<16} {:<16} {:>6}  {}{}",
            p.slug,
            p.folder_name(),
            p.rom_count,
            p.display_name(),
            marker
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn print_dry_run_result(result: &DryRunResult, report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "summary": {
                    "add": result.total_add,
                    "update": result.total_update,
                    "remove": result.total_remove,
                    "unchanged": result.total_unchanged,
                    "images_to_download": result.images_to_download,
                    "binaries_to_download": result.binaries_to_download,
                    "size_bytes": result.total_size_bytes,
                    "files_to_delete": result.files_to_delete,
                },
                "manifests_to_write": result.manifests_to_write,
                "items": result.effective_items().collect::<Vec<_>>(),
                "failures": report.failures,
            }))?
        );
        return Ok(());
    }

    println!("Dry Run Results:");
    println!("  To Add:       {}", result.total_add);
    println!("  To Update:    {}", result.total_update);
    println!("  To Remove:    {}", result.total_remove);
    println!("  Unchanged:    {}", result.total_unchanged);
    println!("  Images:       {}", result.images_to_download);
    if result.binaries_to_download > 0 {
        println!("  ROMs:         {} ({})", result.binaries_to_download, result.size_display());
    }
    println!("  Files to delete: {}", result.files_to_delete);
    println!();

    let changes: Vec<_> = result
        .effective_items()
        .filter(|i| !matches!(i.action, DryRunAction::Unchanged))
        .collect();

    if !changes.is_empty() {
        println!("Changes (first 20):");
        for item in changes.iter().take(20) {
            println!("  {:<9} {}", format!("{:?}", item.action), item.display_name());
        }
        if changes.len() > 20 {
            println!("  ... and {} more", changes.len() - 20);
        }
        println!();
    }

    if !result.manifests_to_write.is_empty() {
        println!("Gamelists that would be written:");
        for path in &result.manifests_to_write {
            println!("  {}", path.display());
        }
    }

    print_failures(report);
    Ok(())
}

fn print_sync_result(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for platform in &report.platforms {
        println!(
            "{} ({}): {} games, +{} ~{} -{}",
            platform.name,
            platform.folder,
            platform.total_entries(),
            platform.added.len(),
            platform.updated.len(),
            platform.removed.len()
        );
        if platform.images.downloaded + platform.images.unavailable > 0 {
            println!(
                "  Images: {} downloaded, {} unavailable",
                platform.images.downloaded, platform.images.unavailable
            );
        }
        if platform.binaries.downloaded > 0 {
            println!("  ROMs:   {} downloaded", platform.binaries.downloaded);
        }
        if platform.files_deleted > 0 {
            println!("  Deleted {} file(s)", platform.files_deleted);
        }
        for error in &platform.errors {
            println!("  - [{}] {}", error.identity_key, error.message);
        }
    }

    println!();
    println!("Sync Complete:");
    println!("  Added:     {}", report.total_added());
    println!("  Updated:   {}", report.total_updated());
    println!("  Removed:   {}", report.total_removed());
    println!("  Errors:    {}", report.total_item_errors());
    println!("  Downloaded {}", romm_sync_core::format_bytes(report.total_bytes()));

    print_failures(report);
    Ok(())
}

fn print_failures(report: &RunReport) {
    if report.failures.is_empty() {
        return;
    }

    println!();
    println!("Failed platforms ({}/{}):", report.failures.len(), report.selected());
    for failure in &report.failures {
        println!("  - {}: {}", failure.slug, failure.message);
    }
}
