//! Desired per-platform state built from catalog records

use std::collections::HashSet;
use std::path::PathBuf;

use crate::catalog::CatalogRecord;
use crate::manifest::ManifestEntry;
use crate::target::TargetConfig;
use crate::utils::sanitize_filename;

/// Date format EmulationStation expects in `releasedate`
const RELEASE_DATE_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A catalog record resolved against a target layout
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredEntry {
    pub record: CatalogRecord,
    pub identity_key: String,
    /// Reference written to the manifest `path` element
    pub binary_ref: String,
    /// Where the binary lives (or would be downloaded to)
    pub binary_path: PathBuf,
    /// Where the cover art lives; `None` when the record has no cover
    pub asset_path: Option<PathBuf>,
    pub kid_friendly: bool,
}

impl DesiredEntry {
    /// Render the manifest entry for this record
    pub fn to_manifest_entry(&self) -> ManifestEntry {
        let record = &self.record;
        ManifestEntry {
            identity_key: self.identity_key.clone(),
            legacy: false,
            path: self.binary_ref.clone(),
            name: record.title.clone(),
            desc: record.description.clone(),
            image: self
                .asset_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            rating: record.rating.map(|r| format!("{:.2}", r)),
            release_date: record
                .release_date
                .map(|d| d.format(RELEASE_DATE_FORMAT).to_string()),
            developer: join(&record.developers),
            publisher: join(&record.publishers),
            genre: join(&record.genres),
            players: Some(record.player_count.to_string()),
            kid_game: self.kid_friendly.then(|| "true".to_string()),
            extra: Vec::new(),
        }
    }

    /// Binary file name on disk
    pub fn binary_file_name(&self) -> String {
        sanitize_filename(self.record.file_name_or_title())
    }
}

fn join(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Resolve every record of one platform against the target layout.
///
/// `folder` is the platform's local folder name; `kid_ids` is the run-wide
/// kid-friendly collection membership.
pub fn build(
    records: Vec<CatalogRecord>,
    folder: &str,
    target: &TargetConfig,
    kid_ids: &HashSet<i64>,
) -> Vec<DesiredEntry> {
    let binary_dir = target.binary_dir(folder);
    let asset_dir = target.asset_dir(folder);

    records
        .into_iter()
        .map(|record| {
            let identity_key = target.naming_mode.identity_key(&record);
            let file_name = sanitize_filename(record.file_name_or_title());
            let binary_path = binary_dir.join(&file_name);
            let binary_ref = if target.use_absolute_binary_paths {
                binary_path.to_string_lossy().into_owned()
            } else {
                format!("./{}", file_name)
            };
            let asset_path = record
                .has_cover()
                .then(|| asset_dir.join(target.naming_mode.asset_file_name(&identity_key)));
            let kid_friendly = kid_ids.contains(&record.id);

            DesiredEntry {
                record,
                identity_key,
                binary_ref,
                binary_path,
                asset_path,
                kid_friendly,
            }
        })
        .collect()
}
