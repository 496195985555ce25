//! Dry run mode for previewing a sync without touching the filesystem

use std::path::PathBuf;

use serde::Serialize;

/// Action that would be taken for a game during sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunAction {
    /// New entry in the manifest
    Add,
    /// Manifest entry rewritten with new metadata
    Update,
    /// Entry and its files removed
    Remove,
    /// Nothing changes for this entry
    Unchanged,
}

impl std::fmt::Display for DryRunAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "Add"),
            Self::Update => write!(f, "Update"),
            Self::Remove => write!(f, "Remove"),
            Self::Unchanged => write!(f, "Unchanged"),
        }
    }
}

/// A single item in the dry run preview
#[derive(Debug, Clone, Serialize)]
pub struct DryRunItem {
    /// Remote platform slug
    pub platform: String,
    /// Identity key in the manifest
    pub identity_key: String,
    /// Display title
    pub title: String,
    /// Action that would be taken
    pub action: DryRunAction,
    /// Cover art would be downloaded
    pub downloads_image: bool,
    /// Binary would be downloaded
    pub downloads_binary: bool,
    /// Estimated binary size in bytes (0 when unknown or not downloaded)
    pub size_bytes: u64,
    /// Files that would be deleted
    pub deletes: Vec<PathBuf>,
}

impl DryRunItem {
    pub fn new(
        platform: impl Into<String>,
        identity_key: impl Into<String>,
        title: impl Into<String>,
        action: DryRunAction,
    ) -> Self {
        Self {
            platform: platform.into(),
            identity_key: identity_key.into(),
            title: title.into(),
            action,
            downloads_image: false,
            downloads_binary: false,
            size_bytes: 0,
            deletes: Vec::new(),
        }
    }

    /// Returns `true` if the item causes any filesystem change
    pub fn has_effect(&self) -> bool {
        self.action != DryRunAction::Unchanged
            || self.downloads_image
            || self.downloads_binary
            || !self.deletes.is_empty()
    }

    /// Get a display name for the item
    pub fn display_name(&self) -> String {
        format!("{} [{}]", self.title, self.identity_key)
    }
}

/// Result of a dry run analysis
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunResult {
    /// All items that would be processed
    pub items: Vec<DryRunItem>,
    pub total_add: usize,
    pub total_update: usize,
    pub total_remove: usize,
    pub total_unchanged: usize,
    pub images_to_download: usize,
    pub binaries_to_download: usize,
    /// Total size in bytes of binaries to download
    pub total_size_bytes: u64,
    pub files_to_delete: usize,
    /// Manifests that would be (re)written
    pub manifests_to_write: Vec<PathBuf>,
}

impl DryRunResult {
    /// Create a new empty dry run result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item to the result
    pub fn add_item(&mut self, item: DryRunItem) {
        match item.action {
            DryRunAction::Add => self.total_add += 1,
            DryRunAction::Update => self.total_update += 1,
            DryRunAction::Remove => self.total_remove += 1,
            DryRunAction::Unchanged => self.total_unchanged += 1,
        }
        if item.downloads_image {
            self.images_to_download += 1;
        }
        if item.downloads_binary {
            self.binaries_to_download += 1;
            self.total_size_bytes += item.size_bytes;
        }
        self.files_to_delete += item.deletes.len();
        self.items.push(item);
    }

    /// Get total number of items
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    /// Items that change something on disk
    pub fn effective_items(&self) -> impl Iterator<Item = &DryRunItem> {
        self.items.iter().filter(|item| item.has_effect())
    }

    /// Format the total download size as a human-readable string
    pub fn size_display(&self) -> String {
        format_bytes(self.total_size_bytes)
    }

    /// Check if a real run would change anything
    pub fn has_changes(&self) -> bool {
        !self.manifests_to_write.is_empty() || self.effective_items().next().is_some()
    }
}

/// Format bytes as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
