//! Target profiles and resolution of per-run filesystem layout
//!
//! A target describes where a frontend expects gamelists, artwork and ROM
//! files. [`TargetResolver::resolve`] turns a target name plus overrides
//! into an immutable [`TargetConfig`] that every component borrows.

pub mod esde;

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogRecord;
use crate::error::{Error, Result};
use crate::utils::{expand_home, file_stem, sanitize_filename};

/// Name of the per-platform manifest file
pub const MANIFEST_FILENAME: &str = "gamelist.xml";

/// Extension used for downloaded cover art
const ASSET_EXTENSION: &str = "png";

/// Known frontend/device profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// RetroPie with EmulationStation; fixed layout
    #[default]
    RetroPie,
    /// Steam Deck with ES-DE; roots read from ES-DE's own settings
    SteamDeck,
}

impl TargetKind {
    pub fn all() -> &'static [TargetKind] {
        &[Self::RetroPie, Self::SteamDeck]
    }

    /// Identifier used on the command line and in config files
    pub fn name(&self) -> &'static str {
        match self {
            Self::RetroPie => "retropie",
            Self::SteamDeck => "steamdeck",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::RetroPie => "RetroPie",
            Self::SteamDeck => "SteamDeck (ES-DE)",
        }
    }

    /// Returns `true` if roots come from the frontend's settings store
    pub fn is_auto_detected(&self) -> bool {
        matches!(self, Self::SteamDeck)
    }

    /// Asset naming the frontend expects; not configurable per run
    pub fn naming_mode(&self) -> AssetNamingMode {
        match self {
            Self::RetroPie => AssetNamingMode::ByIdentity,
            Self::SteamDeck => AssetNamingMode::ByFilename,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "retropie" => Ok(Self::RetroPie),
            "steamdeck" | "es-de" | "esde" => Ok(Self::SteamDeck),
            other => {
                let known: Vec<&str> = Self::all().iter().map(|k| k.name()).collect();
                Err(Error::Config(format!(
                    "Unknown target '{}'. Use: {}",
                    other,
                    known.join(" or ")
                )))
            }
        }
    }
}

/// How identity keys and artwork names are derived from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetNamingMode {
    /// Keyed by the server-assigned record id
    ByIdentity,
    /// Keyed by the binary's file name
    ByFilename,
}

impl AssetNamingMode {
    /// Key matching a record to its manifest entry
    pub fn identity_key(&self, record: &CatalogRecord) -> String {
        match self {
            Self::ByIdentity => record.id.to_string(),
            Self::ByFilename => record.file_name_or_title().to_string(),
        }
    }

    /// Artwork file name for an identity key
    pub fn asset_file_name(&self, identity_key: &str) -> String {
        match self {
            Self::ByIdentity => format!("{}-image.{}", identity_key, ASSET_EXTENSION),
            Self::ByFilename => format!(
                "{}.{}",
                sanitize_filename(file_stem(identity_key)),
                ASSET_EXTENSION
            ),
        }
    }
}

impl fmt::Display for AssetNamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByIdentity => write!(f, "by-identity"),
            Self::ByFilename => write!(f, "by-filename"),
        }
    }
}

/// Immutable per-run layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub kind: TargetKind,
    pub manifest_root: PathBuf,
    pub asset_root: PathBuf,
    pub binary_root: PathBuf,
    /// Extra directory level under each platform's asset folder
    pub asset_subdir: Option<String>,
    pub naming_mode: AssetNamingMode,
    pub use_absolute_binary_paths: bool,
}

impl TargetConfig {
    /// `<manifestRoot>/<folder>/gamelist.xml`
    pub fn manifest_path(&self, folder: &str) -> PathBuf {
        self.manifest_root.join(folder).join(MANIFEST_FILENAME)
    }

    /// `<assetRoot>/<folder>[/<subdir>]`
    pub fn asset_dir(&self, folder: &str) -> PathBuf {
        let dir = self.asset_root.join(folder);
        match self.asset_subdir {
            Some(ref subdir) => dir.join(subdir),
            None => dir,
        }
    }

    /// `<binaryRoot>/<folder>`
    pub fn binary_dir(&self, folder: &str) -> PathBuf {
        self.binary_root.join(folder)
    }

    /// Returns `true` if `path` lies strictly inside one of the managed roots
    /// without climbing back out through `..`
    pub fn is_managed_path(&self, path: &Path) -> bool {
        [&self.manifest_root, &self.asset_root, &self.binary_root]
            .iter()
            .filter_map(|root| path.strip_prefix(root).ok())
            .any(|rest| {
                rest.components().next().is_some()
                    && rest.components().all(|c| matches!(c, Component::Normal(_)))
            })
    }
}

/// Explicit overrides; each set field wins over detected or built-in values
#[derive(Debug, Clone, Default)]
pub struct TargetOverrides {
    pub manifest_root: Option<PathBuf>,
    pub asset_root: Option<PathBuf>,
    pub binary_root: Option<PathBuf>,
    pub use_absolute_binary_paths: Option<bool>,
    /// Skip reading the frontend settings store
    pub disable_auto_detect: bool,
}

/// Built-in layout for a target, before detection and overrides
struct Profile {
    manifest_root: &'static str,
    asset_root: Option<&'static str>,
    binary_root: Option<&'static str>,
    asset_subdir: Option<&'static str>,
    use_absolute_binary_paths: bool,
}

impl TargetKind {
    fn profile(&self) -> Profile {
        match self {
            Self::RetroPie => Profile {
                manifest_root: "~/.emulationstation/gamelists",
                asset_root: Some("~/.emulationstation/downloaded_images"),
                binary_root: Some("~/RetroPie/roms"),
                asset_subdir: None,
                use_absolute_binary_paths: false,
            },
            Self::SteamDeck => Profile {
                manifest_root: "~/ES-DE/gamelists",
                asset_root: None,
                binary_root: None,
                asset_subdir: Some("covers"),
                use_absolute_binary_paths: true,
            },
        }
    }
}

/// Builds [`TargetConfig`] values. Reads files, never writes them.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    home: PathBuf,
}

impl TargetResolver {
    /// Resolver rooted at an explicit home directory
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolver rooted at the current user's home directory
    pub fn from_env() -> Result<Self> {
        dirs::home_dir()
            .map(Self::new)
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path of the ES-DE settings file for this home directory
    pub fn settings_path(&self) -> PathBuf {
        esde::settings_path(&self.home)
    }

    /// Resolve a target into a concrete layout.
    ///
    /// For auto-detected targets the settings store must exist and supply
    /// every root that is not explicitly overridden; otherwise this fails
    /// with [`Error::Config`] instead of guessing.
    pub fn resolve(&self, kind: TargetKind, overrides: &TargetOverrides) -> Result<TargetConfig> {
        let profile = kind.profile();
        let expand = |p: &str| expand_home(p, &self.home);
        let expand_override = |p: &PathBuf| expand_home(&p.to_string_lossy(), &self.home);

        let mut asset_root = profile.asset_root.map(expand);
        let mut binary_root = profile.binary_root.map(expand);

        if kind.is_auto_detected() && !overrides.disable_auto_detect {
            let settings = esde::read_settings(&self.settings_path())?;

            if let Some(ref media) = settings.media_directory {
                tracing::info!("Detected ES-DE media directory: {}", media);
                asset_root = Some(expand(media));
            }
            if let Some(ref roms) = settings.rom_directory {
                tracing::info!("Detected ES-DE ROM directory: {}", roms);
                binary_root = Some(expand(roms));
            }
        }

        if let Some(ref path) = overrides.asset_root {
            asset_root = Some(expand_override(path));
        }
        if let Some(ref path) = overrides.binary_root {
            binary_root = Some(expand_override(path));
        }

        let asset_root = asset_root.ok_or_else(|| missing_root(kind, overrides, "media", esde::MEDIA_DIRECTORY_KEY))?;
        let binary_root = binary_root.ok_or_else(|| missing_root(kind, overrides, "ROM", esde::ROM_DIRECTORY_KEY))?;

        let manifest_root = overrides
            .manifest_root
            .as_ref()
            .map(expand_override)
            .unwrap_or_else(|| expand(profile.manifest_root));

        let config = TargetConfig {
            kind,
            manifest_root,
            asset_root,
            binary_root,
            asset_subdir: profile.asset_subdir.map(str::to_string),
            naming_mode: kind.naming_mode(),
            use_absolute_binary_paths: overrides
                .use_absolute_binary_paths
                .unwrap_or(profile.use_absolute_binary_paths),
        };

        tracing::debug!("Resolved target {}: {:?}", kind, config);
        Ok(config)
    }
}

fn missing_root(kind: TargetKind, overrides: &TargetOverrides, what: &str, key: &str) -> Error {
    if overrides.disable_auto_detect {
        Error::Config(format!(
            "Target '{}' needs an explicit {} path when auto-detection is disabled",
            kind, what
        ))
    } else {
        Error::Config(format!(
            "Could not detect {} from ES-DE settings; configure ES-DE or pass the {} path explicitly",
            key, what
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(id: i64, file_name: Option<&str>) -> CatalogRecord {
        let mut value = serde_json::json!({ "id": id, "name": "Some Game" });
        if let Some(name) = file_name {
            value["fs_name"] = serde_json::json!(name);
        }
        CatalogRecord::from_value(value, "snes", true).unwrap()
    }

    fn write_settings(home: &Path, body: &str) {
        let path = esde::settings_path(home);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_target_kind_parse() {
        assert_eq!("retropie".parse::<TargetKind>().unwrap(), TargetKind::RetroPie);
        assert_eq!("SteamDeck".parse::<TargetKind>().unwrap(), TargetKind::SteamDeck);
        assert!("batocera".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_naming_mode_determinism() {
        let a = record(10, Some("Game (USA).sfc"));
        let b = record(10, Some("Game (Europe).sfc"));

        let by_file = AssetNamingMode::ByFilename;
        assert_ne!(by_file.identity_key(&a), by_file.identity_key(&b));

        let by_id = AssetNamingMode::ByIdentity;
        assert_eq!(by_id.identity_key(&a), by_id.identity_key(&b));
        assert_eq!(by_id.identity_key(&a), "10");
    }

    #[test]
    fn test_asset_file_names() {
        assert_eq!(AssetNamingMode::ByIdentity.asset_file_name("123"), "123-image.png");
        assert_eq!(
            AssetNamingMode::ByFilename.asset_file_name("Game (USA).sfc"),
            "Game (USA).png"
        );
        assert_eq!(AssetNamingMode::ByFilename.asset_file_name("A/B: C"), "A_B_ C.png");
    }

    #[test]
    fn test_fixed_layout_target() {
        let home = tempfile::tempdir().unwrap();
        let resolver = TargetResolver::new(home.path());
        let config = resolver
            .resolve(TargetKind::RetroPie, &TargetOverrides::default())
            .unwrap();

        assert_eq!(config.manifest_root, home.path().join(".emulationstation/gamelists"));
        assert_eq!(config.binary_root, home.path().join("RetroPie/roms"));
        assert_eq!(config.naming_mode, AssetNamingMode::ByIdentity);
        assert!(!config.use_absolute_binary_paths);
        assert_eq!(
            config.asset_dir("snes"),
            home.path().join(".emulationstation/downloaded_images/snes")
        );
        assert_eq!(
            config.manifest_path("snes"),
            home.path().join(".emulationstation/gamelists/snes/gamelist.xml")
        );
    }

    #[test]
    fn test_overrides_take_precedence_field_by_field() {
        let home = tempfile::tempdir().unwrap();
        let resolver = TargetResolver::new(home.path());
        let overrides = TargetOverrides {
            binary_root: Some(PathBuf::from("/mnt/roms")),
            use_absolute_binary_paths: Some(true),
            ..Default::default()
        };
        let config = resolver.resolve(TargetKind::RetroPie, &overrides).unwrap();

        assert_eq!(config.binary_root, PathBuf::from("/mnt/roms"));
        assert!(config.use_absolute_binary_paths);
        assert_eq!(config.asset_root, home.path().join(".emulationstation/downloaded_images"));
    }

    #[test]
    fn test_auto_detected_target() {
        let home = tempfile::tempdir().unwrap();
        write_settings(
            home.path(),
            r#"<?xml version="1.0"?>
<string name="MediaDirectory" value="~/Emulation/tools/downloaded_media" />
<string name="ROMDirectory" value="/run/media/sd/Emulation/roms" />
"#,
        );

        let config = TargetResolver::new(home.path())
            .resolve(TargetKind::SteamDeck, &TargetOverrides::default())
            .unwrap();

        assert_eq!(config.asset_root, home.path().join("Emulation/tools/downloaded_media"));
        // The detected ROM directory is used as-is, without an extra `roms` segment
        assert_eq!(config.binary_root, PathBuf::from("/run/media/sd/Emulation/roms"));
        assert_eq!(config.binary_dir("snes"), PathBuf::from("/run/media/sd/Emulation/roms/snes"));
        assert_eq!(
            config.asset_dir("snes"),
            home.path().join("Emulation/tools/downloaded_media/snes/covers")
        );
        assert_eq!(config.naming_mode, AssetNamingMode::ByFilename);
        assert!(config.use_absolute_binary_paths);
    }

    #[test]
    fn test_auto_detect_missing_settings_fails_without_writes() {
        let home = tempfile::tempdir().unwrap();
        let err = TargetResolver::new(home.path())
            .resolve(TargetKind::SteamDeck, &TargetOverrides::default())
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(fs::read_dir(home.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_auto_detect_missing_key_fails() {
        let home = tempfile::tempdir().unwrap();
        write_settings(home.path(), r#"<string name="ROMDirectory" value="/roms" />"#);

        let err = TargetResolver::new(home.path())
            .resolve(TargetKind::SteamDeck, &TargetOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("MediaDirectory"));

        // An explicit override satisfies the missing key
        let overrides = TargetOverrides {
            asset_root: Some(PathBuf::from("/media")),
            ..Default::default()
        };
        let config = TargetResolver::new(home.path())
            .resolve(TargetKind::SteamDeck, &overrides)
            .unwrap();
        assert_eq!(config.asset_root, PathBuf::from("/media"));
        assert_eq!(config.binary_root, PathBuf::from("/roms"));
    }

    #[test]
    fn test_auto_detect_disabled_requires_both_roots() {
        let home = tempfile::tempdir().unwrap();
        let resolver = TargetResolver::new(home.path());

        let partial = TargetOverrides {
            binary_root: Some(PathBuf::from("/roms")),
            disable_auto_detect: true,
            ..Default::default()
        };
        assert!(matches!(
            resolver.resolve(TargetKind::SteamDeck, &partial),
            Err(Error::Config(_))
        ));

        let full = TargetOverrides {
            asset_root: Some(PathBuf::from("/media")),
            ..partial
        };
        assert!(resolver.resolve(TargetKind::SteamDeck, &full).is_ok());
    }

    #[test]
    fn test_is_managed_path() {
        let home = tempfile::tempdir().unwrap();
        let config = TargetResolver::new(home.path())
            .resolve(TargetKind::RetroPie, &TargetOverrides::default())
            .unwrap();
        assert!(config.is_managed_path(&config.binary_dir("nes").join("smb.nes")));
        assert!(config.is_managed_path(&config.asset_dir("nes").join("1-image.png")));
        assert!(!config.is_managed_path(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_parent_components_escape_managed_roots() {
        let home = tempfile::tempdir().unwrap();
        let config = TargetResolver::new(home.path())
            .resolve(TargetKind::RetroPie, &TargetOverrides::default())
            .unwrap();
        assert!(!config.is_managed_path(&config.binary_dir("nes").join("..")));
        assert!(!config.is_managed_path(&config.binary_dir("..").join("..").join("x.nes")));
        assert!(!config.is_managed_path(&config.binary_root));
    }

    #[test]
    fn test_unknown_target_lists_known_names() {
        let err = "amiga".parse::<TargetKind>().unwrap_err();
        assert!(err.to_string().contains("retropie or steamdeck"));
        for kind in TargetKind::all() {
            assert_eq!(kind.name().parse::<TargetKind>().unwrap(), *kind);
        }
    }
}
