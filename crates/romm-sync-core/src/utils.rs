//! Utility functions shared across modules.

use std::path::{Path, PathBuf};

/// Make a game title or file name safe to use as a local file name.
///
/// Characters that are invalid on common filesystems (`/ \ : * ? " < > |`)
/// become underscores and surrounding whitespace is dropped.
///
/// ```
/// use romm_sync_core::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Zelda: A Link to the Past"), "Zelda_ A Link to the Past");
/// assert_eq!(sanitize_filename("  spaced  "), "spaced");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// File name without its final extension (`"Game (USA).sfc"` -> `"Game (USA)"`)
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Expand a leading `~` against `home`.
pub fn expand_home(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        home.to_path_buf()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Last path component of a manifest reference, accepting either separator
pub fn reference_file_name(reference: &str) -> Option<&str> {
    reference
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}
