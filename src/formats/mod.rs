//! On-disk formats and file I/O for [`Document`]s.
//!
//! Supported extensions, in resolver priority order: `jsonc`, `json`, `yml`,
//! `yaml`, `toml`. YAML and TOML need their cargo features; asking for an
//! unavailable format fails with [`ConfigError::FormatUnavailable`].

mod json;
pub mod scalar;
mod toml;
mod yaml;

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::str::FromStr;

use tempfile::NamedTempFile;

use crate::document::{Document, Value};
use crate::error::{ConfigError, ConfigResult};

/// A supported file format, named by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Jsonc,
    Json,
    Yml,
    Yaml,
    Toml,
}

/// All formats in resolver priority order.
pub const SUPPORTED: [Format; 5] = [
    Format::Jsonc,
    Format::Json,
    Format::Yml,
    Format::Yaml,
    Format::Toml,
];

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Jsonc => "jsonc",
            Format::Json => "json",
            Format::Yml => "yml",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }

    /// Human name used in messages.
    pub fn name(self) -> &'static str {
        match self {
            Format::Jsonc => "JSONC",
            Format::Json => "JSON",
            Format::Yml | Format::Yaml => "YAML",
            Format::Toml => "TOML",
        }
    }

    /// Cargo feature that provides this format, if any.
    pub fn feature(self) -> Option<&'static str> {
        match self {
            Format::Yml | Format::Yaml => Some("yaml"),
            Format::Toml => Some("toml"),
            Format::Jsonc | Format::Json => None,
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            Format::Yml | Format::Yaml => cfg!(feature = "yaml"),
            Format::Toml => cfg!(feature = "toml"),
            Format::Jsonc | Format::Json => true,
        }
    }

    /// Fail with a descriptive error when this format is compiled out.
    pub fn ensure_available(self) -> ConfigResult<()> {
        if self.is_available() {
            return Ok(());
        }
        Err(ConfigError::FormatUnavailable {
            format: self.name(),
            feature: self.feature().unwrap_or("default"),
        })
    }

    /// `yml` when YAML is compiled in, otherwise `jsonc`.
    pub fn platform_default() -> Format {
        if Format::Yml.is_available() {
            Format::Yml
        } else {
            Format::Jsonc
        }
    }

    /// Parse an extension, ignoring case, surrounding whitespace and a
    /// leading dot.
    pub fn from_extension(ext: &str) -> Option<Format> {
        let normalized = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        SUPPORTED
            .into_iter()
            .find(|format| format.extension() == normalized)
    }

    pub fn from_path(path: &Path) -> Option<Format> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_extension)
    }

    /// Format for a path, falling back to the platform default for unknown
    /// extensions.
    pub fn for_path(path: &Path) -> Format {
        Format::from_path(path).unwrap_or_else(Format::platform_default)
    }

    /// Whether the writer keeps comments and the header.
    pub fn supports_comments(self) -> bool {
        !matches!(self, Format::Json)
    }

    /// Parse text into a document, including any comments it carries.
    pub fn parse(self, text: &str) -> Result<Document, String> {
        if text.trim().is_empty() {
            return Ok(Document::new());
        }
        let value = match self {
            Format::Json => json::parse_json(text)?,
            Format::Jsonc => json::parse_jsonc(text)?,
            Format::Yml | Format::Yaml => parse_yaml(text)?,
            Format::Toml => parse_toml(text)?,
        };
        let root = match value {
            Value::Map(map) => map,
            Value::Null => Default::default(),
            other => {
                return Err(format!(
                    "top-level value must be a mapping, found {}",
                    other.kind()
                ));
            }
        };

        let mut doc = Document::from_root(root);
        let (header, comments) = match self {
            Format::Json => (Vec::new(), Default::default()),
            Format::Jsonc => json::harvest(text),
            Format::Yml | Format::Yaml => yaml::harvest(text),
            Format::Toml => self::toml::harvest(text),
        };
        doc.set_header(header);
        doc.add_comments(&comments, "");
        Ok(doc)
    }

    /// Render a document as text in this format.
    pub fn render(self, doc: &Document) -> Result<String, String> {
        match self {
            Format::Json => json::emit_json(doc),
            Format::Jsonc => Ok(json::emit_jsonc(doc)),
            Format::Yml | Format::Yaml => Ok(yaml::emit(doc)),
            Format::Toml => Ok(self::toml::emit(doc)),
        }
    }
}

#[cfg(feature = "yaml")]
fn parse_yaml(text: &str) -> Result<Value, String> {
    yaml::parse(text)
}

#[cfg(not(feature = "yaml"))]
fn parse_yaml(_text: &str) -> Result<Value, String> {
    Err("YAML support is not compiled in".to_string())
}

#[cfg(feature = "toml")]
fn parse_toml(text: &str) -> Result<Value, String> {
    self::toml::parse(text)
}

#[cfg(not(feature = "toml"))]
fn parse_toml(_text: &str) -> Result<Value, String> {
    Err("TOML support is not compiled in".to_string())
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::from_extension(s).ok_or_else(|| format!("unsupported config format '{s}'"))
    }
}

/// Read a document in the given format.
///
/// A missing or empty file is an empty document. Malformed text, including
/// bytes that are not UTF-8, is a [`ConfigError::Parse`].
pub fn read_as(path: &Path, format: Format) -> ConfigResult<Document> {
    format.ensure_available()?;
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
        Err(e) => return Err(ConfigError::io(path, e)),
    };
    let text = String::from_utf8(bytes).map_err(|e| ConfigError::parse(path, e))?;
    format
        .parse(&text)
        .map_err(|reason| ConfigError::parse(path, reason))
}

/// Read a document, choosing the format from the file extension.
pub fn read(path: &Path) -> ConfigResult<Document> {
    read_as(path, Format::for_path(path))
}

/// Read a document, treating malformed content as empty.
///
/// The parse failure is logged; I/O failures still propagate.
pub fn read_lenient(path: &Path) -> ConfigResult<Document> {
    match read(path) {
        Err(ConfigError::Parse { path, reason }) => {
            tracing::warn!(
                "[formats] {} is malformed, treating it as empty: {reason}",
                path.display()
            );
            Ok(Document::new())
        }
        other => other,
    }
}

/// Write a document in the given format, creating parent directories.
///
/// The text goes to a temporary sibling first and is renamed over `path`, so
/// readers never see a partially written file.
pub fn write_as(path: &Path, format: Format, doc: &Document) -> ConfigResult<()> {
    format.ensure_available()?;
    let text = format
        .render(doc)
        .map_err(|reason| ConfigError::InvalidValue {
            path: path.display().to_string(),
            reason,
        })?;
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
            parent
        }
        None => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| ConfigError::io(parent, e))?;
    temp.write_all(text.as_bytes())
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| ConfigError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| ConfigError::io(path, e.error))?;
    Ok(())
}

/// Write a document, choosing the format from the file extension.
pub fn write(path: &Path, doc: &Document) -> ConfigResult<()> {
    write_as(path, Format::for_path(path), doc)
}
