//! Per-platform `gamelist.xml` manifests
//!
//! The manifest is the only durable state: it records what a previous run
//! synced and is read back as the baseline for the next diff.

mod reader;
mod writer;

pub use reader::{parse, read};
pub use writer::{render, write};

/// Value of the `source` attribute on entries this tool writes
pub const MANIFEST_SOURCE: &str = "RomM";

/// One `<game>` element of a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Key matching this entry to a catalog record
    pub identity_key: String,
    /// Set when the entry had no `id` attribute and the key came from `path`
    pub legacy: bool,
    /// Binary reference (`./file` or an absolute path)
    pub path: String,
    pub name: String,
    pub desc: Option<String>,
    /// Artwork reference
    pub image: Option<String>,
    pub rating: Option<String>,
    pub release_date: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genre: Option<String>,
    pub players: Option<String>,
    pub kid_game: Option<String>,
    /// Child elements written by someone else (e.g. the frontend's play counts)
    pub extra: Vec<(String, String)>,
}

impl ManifestEntry {
    /// Copy foreign child elements from an existing entry
    pub fn with_extra(mut self, extra: Vec<(String, String)>) -> Self {
        self.extra = extra;
        self
    }

    /// Known fields in serialization order; absent values are skipped on write
    pub(crate) fn fields(&self) -> [(&'static str, Option<&str>); 11] {
        [
            ("path", Some(self.path.as_str())),
            ("name", Some(self.name.as_str())),
            ("desc", self.desc.as_deref()),
            ("image", self.image.as_deref()),
            ("rating", self.rating.as_deref()),
            ("releasedate", self.release_date.as_deref()),
            ("developer", self.developer.as_deref()),
            ("publisher", self.publisher.as_deref()),
            ("genre", self.genre.as_deref()),
            ("players", self.players.as_deref()),
            ("kidgame", self.kid_game.as_deref()),
        ]
    }

    /// Assign a known field by element name. Returns `false` for foreign elements.
    pub(crate) fn set_field(&mut self, element: &str, value: String) -> bool {
        let value = Some(value).filter(|v| !v.is_empty());
        match element {
            "path" => self.path = value.unwrap_or_default(),
            "name" => self.name = value.unwrap_or_default(),
            "desc" => self.desc = value,
            "image" => self.image = value,
            "rating" => self.rating = value,
            "releasedate" => self.release_date = value,
            "developer" => self.developer = value,
            "publisher" => self.publisher = value,
            "genre" => self.genre = value,
            "players" => self.players = value,
            "kidgame" => self.kid_game = value,
            _ => return false,
        }
        true
    }
}
