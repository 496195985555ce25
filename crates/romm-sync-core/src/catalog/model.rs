//! Catalog record types and the single parsing boundary for API payloads

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::platform::map_slug;

/// Game modes that mark a record as multiplayer
const MULTIPLAYER_MODES: [&str; 2] = ["Multiplayer", "Co-operative"];

/// Player count written for multiplayer titles
pub const MULTIPLAYER_PLAYER_COUNT: u32 = 4;

/// A platform as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rom_count: u64,
}

impl Platform {
    /// Local folder name for this platform
    pub fn folder_name(&self) -> &str {
        map_slug(&self.slug)
    }

    /// Human-readable name, falling back to the slug
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.slug
        } else {
            &self.name
        }
    }
}

/// A named server-side collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "roms_count")]
    pub rom_count: u64,
}

impl Collection {
    /// Case-insensitive substring match on the collection name
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// A validated remote game entry.
///
/// Built only through [`CatalogRecord::from_value`]; downstream code never
/// re-checks the payload shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: i64,
    pub platform_slug: String,
    pub title: String,
    pub description: Option<String>,
    /// Normalised to 0.0..=1.0
    pub rating: Option<f32>,
    pub release_date: Option<NaiveDateTime>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub genres: Vec<String>,
    pub player_count: u32,
    pub is_favorite: bool,
    /// On-disk base name of the binary as known to the server
    pub file_name: Option<String>,
    /// Binary size reported by the server
    pub file_size_bytes: Option<u64>,
    /// External (CDN) cover URL, preferred
    pub cover_url: Option<String>,
    /// Server-hosted cover reference, used when no external URL exists
    pub local_cover_ref: Option<String>,
}

impl CatalogRecord {
    /// Parse and validate one record from the API.
    ///
    /// `fallback_platform` is used when the payload omits `platform_slug`.
    pub fn from_value(value: Value, fallback_platform: &str, is_favorite: bool) -> Result<Self> {
        let raw: RawRecord = serde_json::from_value(value)
            .map_err(|e| Error::InvalidRecord(format!("unexpected record shape: {}", e)))?;

        let id = match raw.id {
            Some(id) if id > 0 => id,
            Some(id) => return Err(Error::InvalidRecord(format!("invalid id {}", id))),
            None => return Err(Error::InvalidRecord("record has no id".to_string())),
        };

        let file_name = non_empty(raw.fs_name).or_else(|| non_empty(raw.file_name));
        let title = non_empty(raw.name).unwrap_or_else(|| "Unknown".to_string());
        let igdb = raw.igdb_metadata.unwrap_or_default();

        let rating = igdb
            .total_rating
            .as_ref()
            .and_then(value_as_f64)
            .map(|r| (r / 100.0).clamp(0.0, 1.0) as f32);

        let release_date = raw
            .first_release_date
            .as_ref()
            .or(igdb.first_release_date.as_ref())
            .and_then(parse_release_date);

        let game_modes = igdb.game_modes.unwrap_or_default();
        let player_count = if game_modes
            .iter()
            .any(|m| MULTIPLAYER_MODES.contains(&m.as_str()))
        {
            MULTIPLAYER_PLAYER_COUNT
        } else {
            1
        };

        let genres = raw
            .genres
            .filter(|g| !g.is_empty())
            .or(igdb.genres)
            .unwrap_or_default();

        Ok(Self {
            id,
            platform_slug: non_empty(raw.platform_slug)
                .unwrap_or_else(|| fallback_platform.to_string()),
            title,
            description: non_empty(raw.summary),
            rating,
            release_date,
            developers: igdb.developers.unwrap_or_default(),
            publishers: igdb.publishers.unwrap_or_default(),
            genres,
            player_count,
            is_favorite,
            file_name,
            file_size_bytes: raw.fs_size_bytes,
            cover_url: non_empty(raw.url_cover),
            local_cover_ref: non_empty(raw.path_cover_s).or_else(|| non_empty(raw.path_cover_l)),
        })
    }

    /// Returns `true` if any cover source is available
    pub fn has_cover(&self) -> bool {
        self.cover_url.is_some() || self.local_cover_ref.is_some()
    }

    /// File name if known, otherwise the title
    pub fn file_name_or_title(&self) -> &str {
        self.file_name.as_deref().unwrap_or(&self.title)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    id: Option<i64>,
    platform_slug: Option<String>,
    name: Option<String>,
    summary: Option<String>,
    fs_name: Option<String>,
    file_name: Option<String>,
    fs_size_bytes: Option<u64>,
    url_cover: Option<String>,
    path_cover_s: Option<String>,
    path_cover_l: Option<String>,
    genres: Option<Vec<String>>,
    first_release_date: Option<Value>,
    igdb_metadata: Option<RawIgdbMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIgdbMetadata {
    total_rating: Option<Value>,
    first_release_date: Option<Value>,
    developers: Option<Vec<String>>,
    publishers: Option<Vec<String>>,
    game_modes: Option<Vec<String>>,
    genres: Option<Vec<String>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Release dates arrive as epoch seconds, epoch milliseconds or ISO-8601.
fn parse_release_date(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(epoch) = s.parse::<i64>() {
                return from_epoch(epoch);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(dt);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        _ => None,
    }
}

fn from_epoch(epoch: i64) -> Option<NaiveDateTime> {
    // Anything past year ~5138 in seconds is really milliseconds
    let dt = if epoch.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    };
    dt.map(|d| d.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_record() {
        let value = json!({
            "id": 42,
            "platform_slug": "snes",
            "name": "Super Mario World",
            "summary": "Mario's adventure on Dinosaur Land.",
            "fs_name": "Super Mario World (USA).sfc",
            "fs_size_bytes": 524288,
            "url_cover": "https://images.igdb.com/cover.jpg",
            "path_cover_s": "/assets/romm/resources/roms/42/cover/small.png",
            "genres": ["Platform"],
            "first_release_date": "1990-11-21T00:00:00Z",
            "igdb_metadata": {
                "total_rating": 91.5,
                "developers": ["Nintendo EAD"],
                "publishers": ["Nintendo"],
                "game_modes": ["Single player", "Multiplayer"]
            }
        });

        let record = CatalogRecord::from_value(value, "unused", true).unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.platform_slug, "snes");
        assert_eq!(record.title, "Super Mario World");
        assert_eq!(record.file_name.as_deref(), Some("Super Mario World (USA).sfc"));
        assert_eq!(record.file_size_bytes, Some(524_288));
        assert!((record.rating.unwrap() - 0.915).abs() < 1e-6);
        assert_eq!(
            record.release_date.unwrap().format("%Y%m%dT%H%M%S").to_string(),
            "19901121T000000"
        );
        assert_eq!(record.developers, vec!["Nintendo EAD"]);
        assert_eq!(record.player_count, MULTIPLAYER_PLAYER_COUNT);
        assert!(record.is_favorite);
        assert!(record.has_cover());
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let err = CatalogRecord::from_value(json!({ "name": "No Id" }), "nes", false).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let err = CatalogRecord::from_value(json!({ "id": "abc" }), "nes", false).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_defaults_for_sparse_record() {
        let value = json!({
            "id": 7,
            "name": "",
            "file_name": "tetris.gb",
            "url_cover": "",
            "genres": null,
            "igdb_metadata": null
        });
        let record = CatalogRecord::from_value(value, "game-boy", false).unwrap();
        assert_eq!(record.title, "Unknown");
        assert_eq!(record.platform_slug, "game-boy");
        assert_eq!(record.file_name.as_deref(), Some("tetris.gb"));
        assert_eq!(record.player_count, 1);
        assert!(record.rating.is_none());
        assert!(record.genres.is_empty());
        assert!(!record.has_cover());
    }

    #[test]
    fn test_release_date_formats() {
        let ms = parse_release_date(&json!(659_750_400_000i64)).unwrap();
        let secs = parse_release_date(&json!(659_750_400)).unwrap();
        assert_eq!(ms, secs);
        assert_eq!(ms.format("%Y-%m-%d").to_string(), "1990-11-28");

        let date_only = parse_release_date(&json!("1994-03-19")).unwrap();
        assert_eq!(date_only.format("%Y%m%dT%H%M%S").to_string(), "19940319T000000");

        assert!(parse_release_date(&json!("not a date")).is_none());
        assert!(parse_release_date(&json!(null)).is_none());
    }

    #[test]
    fn test_rating_from_string_and_clamped() {
        let value = json!({ "id": 1, "igdb_metadata": { "total_rating": "150" } });
        let record = CatalogRecord::from_value(value, "nes", false).unwrap();
        assert_eq!(record.rating, Some(1.0));
    }

    #[test]
    fn test_collection_name_match() {
        let collection = Collection {
            id: 3,
            name: "My Favourites".to_string(),
            rom_count: 12,
        };
        assert!(collection.name_contains("favour"));
        assert!(!collection.name_contains("kid"));
    }

    #[test]
    fn test_platform_folder_name() {
        let platform = Platform {
            id: 1,
            slug: "genesis".to_string(),
            name: String::new(),
            rom_count: 0,
        };
        assert_eq!(platform.folder_name(), "megadrive");
        assert_eq!(platform.display_name(), "genesis");
    }
}
