//! Manifest parsing

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::ManifestEntry;
use crate::error::{Error, Result};
use crate::utils::reference_file_name;

/// Read a platform manifest.
///
/// A missing file is a first run and yields no entries. A file that exists
/// but cannot be parsed is an [`Error::Manifest`].
pub fn read(path: &Path) -> Result<Vec<ManifestEntry>> {
    if !path.exists() {
        tracing::debug!("No manifest at {}", path.display());
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    parse(&content).map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))
}

/// Parse manifest content
pub fn parse(content: &str) -> Result<Vec<ManifestEntry>> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut saw_root = false;
    let mut game: Option<(ManifestEntry, Option<String>)> = None;
    let mut field: Option<(String, String)> = None;
    let mut nested = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::Manifest(format!(
                "malformed XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = element_name(&e);
                if game.is_none() {
                    if name == "gameList" {
                        saw_root = true;
                    } else if name == "game" {
                        game = Some((ManifestEntry::default(), id_attribute(&e)?));
                    }
                } else if field.is_none() {
                    field = Some((name, String::new()));
                } else {
                    nested += 1;
                }
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                if game.is_none() {
                    saw_root |= name == "gameList";
                } else if field.is_none() {
                    if let Some((ref mut entry, _)) = game {
                        apply_field(entry, name, String::new());
                    }
                }
            }
            Event::Text(t) => {
                if let Some((_, ref mut text)) = field {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| Error::Manifest(format!("bad text: {}", e)))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if let Some((_, ref mut text)) = field {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if nested > 0 {
                    nested -= 1;
                } else if let Some((name, text)) = field.take() {
                    if let Some((ref mut entry, _)) = game {
                        apply_field(entry, name, text);
                    }
                } else if let Some((entry, id)) = game.take() {
                    if let Some(entry) = finish_entry(entry, id) {
                        entries.push(entry);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if game.is_some() {
        return Err(Error::Manifest("unexpected end of file inside <game>".to_string()));
    }
    if !saw_root {
        return Err(Error::Manifest("missing <gameList> root element".to_string()));
    }

    Ok(entries)
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn id_attribute(e: &BytesStart<'_>) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::Manifest(e.to_string()))?;
        if attr.key.as_ref() == b"id" {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::Manifest(e.to_string()))?;
            let value = value.trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }
    Ok(None)
}

fn apply_field(entry: &mut ManifestEntry, element: String, text: String) {
    if !entry.set_field(&element, text.clone()) {
        entry.extra.push((element, text));
    }
}

fn finish_entry(mut entry: ManifestEntry, id: Option<String>) -> Option<ManifestEntry> {
    match id {
        Some(id) => entry.identity_key = id,
        None => match reference_file_name(&entry.path) {
            Some(file_name) => {
                entry.identity_key = file_name.to_string();
                entry.legacy = true;
            }
            None => {
                tracing::warn!("Ignoring manifest entry '{}' without id or path", entry.name);
                return None;
            }
        },
    }
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"<?xml version="1.0"?>
<gameList>
    <game>
        <path>./game1.sfc</path>
        <name>Super Mario World</name>
        <image>~/.emulationstation/downloaded_images/snes/123-image.png</image>
    </game>
    <game>
        <path>./game2.sfc</path>
        <name>The Legend of Zelda</name>
        <image>~/.emulationstation/downloaded_images/snes/456-image.png</image>
    </game>
</gameList>"#;

    #[test]
    fn test_parse_legacy_manifest() {
        let entries = parse(LEGACY).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].identity_key, "game1.sfc");
        assert!(entries[0].legacy);
        assert_eq!(entries[0].name, "Super Mario World");
        assert_eq!(entries[0].path, "./game1.sfc");
        assert_eq!(
            entries[0].image.as_deref(),
            Some("~/.emulationstation/downloaded_images/snes/123-image.png")
        );
    }

    #[test]
    fn test_parse_with_ids_and_foreign_fields() {
        let content = r#"<?xml version="1.0"?>
<gameList>
  <game id="42" source="RomM">
    <path>/roms/snes/smw.sfc</path>
    <name>Mario &amp; Friends</name>
    <desc><![CDATA[Some <b>bold</b> text]]></desc>
    <kidgame>true</kidgame>
    <playcount>3</playcount>
    <favorite/>
  </game>
</gameList>
"#;
        let entries = parse(content).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.identity_key, "42");
        assert!(!entry.legacy);
        assert_eq!(entry.name, "Mario & Friends");
        assert_eq!(entry.desc.as_deref(), Some("Some <b>bold</b> text"));
        assert_eq!(entry.kid_game.as_deref(), Some("true"));
        assert_eq!(
            entry.extra,
            vec![
                ("playcount".to_string(), "3".to_string()),
                ("favorite".to_string(), String::new())
            ]
        );
    }

    #[test]
    fn test_parse_empty_manifest() {
        assert!(parse("<?xml version=\"1.0\"?>\n<gameList>\n</gameList>").unwrap().is_empty());
        assert!(parse("<gameList/>").unwrap().is_empty());
    }

    #[test]
    fn test_folders_are_ignored() {
        let content = r#"<gameList>
  <folder><path>./Hacks</path><name>Hacks</name></folder>
  <game id="1"><path>./a.nes</path><name>A</name></game>
</gameList>"#;
        let entries = parse(content).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity_key, "1");
    }

    #[test]
    fn test_unparsable_manifest() {
        assert!(parse("<gameList><game><path>./a</path></gameList>").is_err());
        assert!(parse("<gameList><game id=\"1\"><name>A</name>").is_err());
        assert!(parse("").is_err());
        assert!(parse("not xml at all").is_err());
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let entries = read(&dir.path().join("snes").join("gamelist.xml")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_read_corrupt_file_is_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gamelist.xml");
        std::fs::write(&path, "<gameList><game>").unwrap();
        assert!(matches!(read(&path), Err(Error::Manifest(_))));
    }
}
