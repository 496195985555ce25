//! Diff between the existing manifest and the desired state

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::desired::DesiredEntry;
use crate::error::{Error, Result};
use crate::manifest::ManifestEntry;

/// Which part of the catalog a run mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only favorites; entries that are no longer favorites are removed
    #[default]
    Favorites,
    /// The whole catalog; nothing is ever removed
    Full,
}

impl SyncMode {
    pub fn favorites_only(&self) -> bool {
        matches!(self, Self::Favorites)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Favorites => write!(f, "favorites"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "favorites" | "favourites" => Ok(Self::Favorites),
            "full" | "all" => Ok(Self::Full),
            other => Err(Error::Config(format!("Unknown sync mode '{}'", other))),
        }
    }
}

/// Per-platform reconciliation result
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Desired entries with no manifest entry
    pub to_add: Vec<DesiredEntry>,
    /// Desired entries whose rendered metadata changed
    pub to_update: Vec<DesiredEntry>,
    /// Manifest entries no longer desired (favorites mode only)
    pub to_remove: Vec<ManifestEntry>,
    /// Desired entries already in the manifest as rendered
    pub unchanged: Vec<DesiredEntry>,
    /// Manifest entries absent from the catalog but kept (full mode only)
    pub retained: Vec<ManifestEntry>,
    /// Complete manifest after the plan is applied, sorted by identity key
    pub manifest: Vec<ManifestEntry>,
}

impl SyncPlan {
    /// Returns `true` if applying the plan changes the manifest
    pub fn has_changes(&self) -> bool {
        !self.to_add.is_empty() || !self.to_update.is_empty() || !self.to_remove.is_empty()
    }

    /// Every entry the manifest will describe, in identity-key order
    pub fn desired(&self) -> impl Iterator<Item = &DesiredEntry> {
        let mut all: Vec<&DesiredEntry> = self
            .to_add
            .iter()
            .chain(&self.to_update)
            .chain(&self.unchanged)
            .collect();
        all.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
        all.into_iter()
    }

    pub fn add_keys(&self) -> Vec<&str> {
        self.to_add.iter().map(|e| e.identity_key.as_str()).collect()
    }

    pub fn update_keys(&self) -> Vec<&str> {
        self.to_update.iter().map(|e| e.identity_key.as_str()).collect()
    }

    pub fn remove_keys(&self) -> Vec<&str> {
        self.to_remove.iter().map(|e| e.identity_key.as_str()).collect()
    }
}

/// Compute the plan for one platform.
///
/// Entries match on identity key. A legacy entry (no `id` attribute) also
/// matches a desired entry with the same binary file name, so manifests
/// written before ids were recorded are adopted instead of removed.
pub fn diff(existing: Vec<ManifestEntry>, desired: Vec<DesiredEntry>, mode: SyncMode) -> SyncPlan {
    let mut by_key: BTreeMap<String, ManifestEntry> = BTreeMap::new();
    for entry in existing {
        if by_key.contains_key(&entry.identity_key) {
            tracing::warn!("Duplicate manifest entry '{}' dropped", entry.identity_key);
            continue;
        }
        by_key.insert(entry.identity_key.clone(), entry);
    }

    let mut plan = SyncPlan::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut legacy_keys: HashSet<String> = by_key
        .values()
        .filter(|e| e.legacy)
        .map(|e| e.identity_key.clone())
        .collect();

    for entry in desired {
        if !seen.insert(entry.identity_key.clone()) {
            tracing::warn!(
                "Record {} ('{}') shares identity key '{}' with another record; skipped",
                entry.record.id,
                entry.record.title,
                entry.identity_key
            );
            continue;
        }

        let matched = by_key.remove(&entry.identity_key).or_else(|| {
            let file_name = entry.binary_file_name();
            if legacy_keys.remove(&file_name) {
                by_key.remove(&file_name)
            } else {
                None
            }
        });

        match matched {
            Some(current) => {
                let rendered = entry.to_manifest_entry().with_extra(current.extra.clone());
                if rendered == current {
                    plan.manifest.push(current);
                    plan.unchanged.push(entry);
                } else {
                    plan.manifest.push(rendered);
                    plan.to_update.push(entry);
                }
            }
            None => {
                plan.manifest.push(entry.to_manifest_entry());
                plan.to_add.push(entry);
            }
        }
    }

    for (_, leftover) in by_key {
        match mode {
            SyncMode::Favorites => plan.to_remove.push(leftover),
            SyncMode::Full => {
                plan.manifest.push(leftover.clone());
                plan.retained.push(leftover);
            }
        }
    }

    plan.to_add.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
    plan.to_update.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
    plan.unchanged.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
    plan.manifest.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
    plan
}
