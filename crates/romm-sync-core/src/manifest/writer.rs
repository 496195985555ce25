//! Deterministic manifest serialization

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use quick_xml::escape::escape;

use super::{ManifestEntry, MANIFEST_SOURCE};
use crate::error::{Error, Result};

/// Render entries as `gamelist.xml`, sorted by identity key.
///
/// The same entries always produce the same bytes.
pub fn render(entries: &[ManifestEntry]) -> String {
    let mut sorted: Vec<&ManifestEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));

    let mut out = String::from("<?xml version=\"1.0\"?>\n<gameList>\n");
    for entry in sorted {
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "  <game id=\"{}\" source=\"{}\">",
            escape(entry.identity_key.as_str()),
            MANIFEST_SOURCE
        );
        for (element, value) in entry.fields() {
            if let Some(value) = value {
                write_element(&mut out, element, value);
            }
        }
        for (element, value) in &entry.extra {
            write_element(&mut out, element, value);
        }
        out.push_str("  </game>\n");
    }
    out.push_str("</gameList>\n");
    out
}

fn write_element(out: &mut String, element: &str, value: &str) {
    if value.is_empty() {
        let _ = writeln!(out, "    <{}/>", element);
    } else {
        let _ = writeln!(out, "    <{0}>{1}</{0}>", element, escape(value));
    }
}

/// Write a manifest through a temporary sibling file and a rename
pub fn write(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Manifest(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension("xml.tmp");
    fs::write(&tmp_path, render(entries))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    tracing::debug!("Wrote {} entries to {}", entries.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::read;

    fn entry(key: &str, name: &str) -> ManifestEntry {
        ManifestEntry {
            identity_key: key.to_string(),
            path: format!("./{}.sfc", key),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_is_sorted_and_escaped() {
        let mut b = entry("b", "Tom & Jerry");
        b.players = Some("1".to_string());
        let a = entry("a", "<Alpha>");

        let xml = render(&[b, a]);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\"?>\n\
             <gameList>\n\
             \x20 <game id=\"a\" source=\"RomM\">\n\
             \x20   <path>./a.sfc</path>\n\
             \x20   <name>&lt;Alpha&gt;</name>\n\
             \x20 </game>\n\
             \x20 <game id=\"b\" source=\"RomM\">\n\
             \x20   <path>./b.sfc</path>\n\
             \x20   <name>Tom &amp; Jerry</name>\n\
             \x20   <players>1</players>\n\
             \x20 </game>\n\
             </gameList>\n"
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render(&[]), "<?xml version=\"1.0\"?>\n<gameList>\n</gameList>\n");
    }

    #[test]
    fn test_write_then_read_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snes").join("gamelist.xml");

        let mut game = entry("42", "Super Mario World");
        game.desc = Some("Line one\nLine \"two\"".to_string());
        game.genre = Some("Platform, Action".to_string());
        game.extra = vec![("playcount".to_string(), "7".to_string())];

        write(&path, &[game.clone()]).unwrap();
        assert!(!path.with_extension("xml.tmp").exists());

        let first = std::fs::read_to_string(&path).unwrap();
        let entries = read(&path).unwrap();
        assert_eq!(entries, vec![game]);

        write(&path, &entries).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }
}
