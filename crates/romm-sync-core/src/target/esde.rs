//! ES-DE settings detection (`es_settings.xml`)

use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{Error, Result};

/// Settings key holding the ROM root
pub const ROM_DIRECTORY_KEY: &str = "ROMDirectory";
/// Settings key holding the downloaded-media root
pub const MEDIA_DIRECTORY_KEY: &str = "MediaDirectory";

/// Location of the settings file relative to the home directory
pub fn settings_path(home: &Path) -> PathBuf {
    home.join("ES-DE").join("settings").join("es_settings.xml")
}

/// The subset of ES-DE settings the resolver needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsDeSettings {
    pub rom_directory: Option<String>,
    pub media_directory: Option<String>,
}

/// Read and parse the settings file.
///
/// A missing, unreadable or malformed file is a configuration error.
pub fn read_settings(path: &Path) -> Result<EsDeSettings> {
    if !path.is_file() {
        return Err(Error::Config(format!(
            "ES-DE settings not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Could not read ES-DE settings {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_settings(&content).map_err(|e| {
        Error::Config(format!("Could not parse ES-DE settings {}: {}", path.display(), e))
    })
}

/// Parse settings content. Empty values count as absent.
pub fn parse_settings(content: &str) -> Result<EsDeSettings> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut settings = EsDeSettings::default();

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"string" => {
                let mut name = None;
                let mut value = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| Error::Manifest(e.to_string()))?;
                    let text = attr
                        .unescape_value()
                        .map_err(|e| Error::Manifest(e.to_string()))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"name" => name = Some(text),
                        b"value" => value = Some(text),
                        _ => {}
                    }
                }

                let value = value.filter(|v| !v.trim().is_empty());
                match name.as_deref() {
                    Some(ROM_DIRECTORY_KEY) => settings.rom_directory = value,
                    Some(MEDIA_DIRECTORY_KEY) => settings.media_directory = value,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Manifest(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"<?xml version="1.0"?>
<bool name="BackgroundJukebox" value="true" />
<string name="MediaDirectory" value="/run/media/mmcblk0p1/Emulation/tools/downloaded_media" />
<string name="ROMDirectory" value="/run/media/mmcblk0p1/Emulation/roms" />
<string name="Theme" value="epic-noir" />
"#;

    #[test]
    fn test_parse_settings() {
        let settings = parse_settings(SETTINGS).unwrap();
        assert_eq!(
            settings.rom_directory.as_deref(),
            Some("/run/media/mmcblk0p1/Emulation/roms")
        );
        assert_eq!(
            settings.media_directory.as_deref(),
            Some("/run/media/mmcblk0p1/Emulation/tools/downloaded_media")
        );
    }

    #[test]
    fn test_empty_values_are_absent() {
        let settings =
            parse_settings(r#"<string name="ROMDirectory" value="" /><string name="MediaDirectory" value="  " />"#)
                .unwrap();
        assert_eq!(settings, EsDeSettings::default());
    }

    #[test]
    fn test_malformed_settings() {
        assert!(parse_settings("<string name=\"ROMDirectory\" value=\"/x\"></bool>").is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_settings(&settings_path(dir.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
