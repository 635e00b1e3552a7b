//! Format resolution for path templates.
//!
//! A template such as `plugins/{name}/settings.{ext}` names one logical
//! config file that may exist on disk in any supported format. The resolver
//! decides which file is canonical today and whether a file in another format
//! must be migrated into it. Resolution reads only the filesystem and the
//! given [`FormatPreferences`], so repeated calls over the same state agree.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::error::{ConfigError, ConfigResult};
use crate::formats::{Format, SUPPORTED};
use crate::settings::{EngineSettings, FORMAT_ENV};

/// Extension placeholder token.
pub const EXT_TOKEN: &str = "{ext}";

/// Placeholder name whose value is the caller's default extension.
pub const EXT_PLACEHOLDER: &str = "ext";

/// Root-level override file naming the preferred extension for every config.
pub const GLOBAL_FORMAT_FILE: &str = "confkit.format";

/// Suffix of the per-config override file (`<base>.format`).
pub const FORMAT_FILE_SUFFIX: &str = "format";

/// Process-level inputs to format resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatPreferences {
    /// Default extension requested by the caller for one registration.
    pub explicit_default: Option<Format>,
    /// Default when nothing else decides.
    pub platform_default: Format,
    /// Process-wide configured preference.
    pub property: Option<Format>,
    /// Preference from the environment.
    pub env: Option<Format>,
}

impl Default for FormatPreferences {
    fn default() -> Self {
        Self {
            explicit_default: None,
            platform_default: Format::platform_default(),
            property: None,
            env: None,
        }
    }
}

impl FormatPreferences {
    /// Build preferences from engine settings and the current environment.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let platform_default = preference_from(&settings.default_extension, "default_extension")
            .unwrap_or_else(Format::platform_default);
        let property = settings
            .format
            .as_deref()
            .and_then(|ext| preference_from(ext, "format setting"));
        let env = std::env::var(FORMAT_ENV)
            .ok()
            .and_then(|ext| preference_from(&ext, FORMAT_ENV));
        Self {
            explicit_default: None,
            platform_default,
            property,
            env,
        }
    }

    /// Copy with a caller-supplied default extension.
    pub fn with_explicit_default(&self, ext: Option<&str>) -> Self {
        let mut prefs = self.clone();
        prefs.explicit_default = ext.and_then(|ext| preference_from(ext, "default extension"));
        prefs
    }
}

/// Parse an extension preference, warning on unknown or unavailable formats.
fn preference_from(raw: &str, origin: &str) -> Option<Format> {
    if raw.trim().is_empty() {
        return None;
    }
    let Some(format) = Format::from_extension(raw) else {
        tracing::warn!("[resolver] unknown config format '{raw}' from {origin}, ignoring");
        return None;
    };
    if !format.is_available() {
        tracing::warn!(
            "[resolver] {} from {origin} is not available (enable the '{}' feature), ignoring",
            format.name(),
            format.feature().unwrap_or("default")
        );
        return None;
    }
    Some(format)
}

/// Outcome of resolving one template.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDecision {
    /// Canonical file, absolute.
    pub target: PathBuf,
    /// Target relative to the root, `/`-separated.
    pub relative: String,
    pub target_format: Format,
    /// Existing file in another format to migrate into `target`.
    pub source: Option<PathBuf>,
    pub source_format: Option<Format>,
    /// Diagnostics raised while deciding (also logged).
    pub notes: Vec<String>,
}

impl FormatDecision {
    pub fn needs_migration(&self) -> bool {
        self.source.is_some()
    }
}

/// Resolves templates against one sandbox root.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    prefs: FormatPreferences,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>, prefs: FormatPreferences) -> Self {
        Self {
            root: normalize(&root.into()),
            prefs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn preferences(&self) -> &FormatPreferences {
        &self.prefs
    }

    /// Resolve a template whose named placeholders are already applied.
    pub fn resolve(&self, template: &str) -> ConfigResult<FormatDecision> {
        if template.trim().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: template.to_string(),
                reason: "empty path template".to_string(),
            });
        }

        if !template.contains(EXT_TOKEN) {
            let (target, relative) = self.sandbox(template)?;
            return Ok(FormatDecision {
                target_format: Format::for_path(&target),
                target,
                relative,
                source: None,
                source_format: None,
                notes: Vec::new(),
            });
        }

        let base_template = template
            .replace(&format!(".{EXT_TOKEN}"), "")
            .replace(EXT_TOKEN, "");
        let (base, base_relative) = self.sandbox(&base_template)?;
        let mut notes = Vec::new();

        let default = self.prefs.explicit_default.unwrap_or(self.prefs.platform_default);

        let existing: Vec<Format> = SUPPORTED
            .into_iter()
            .filter(|format| {
                let path = with_extension(&base, *format);
                if !path.is_file() {
                    return false;
                }
                if !format.is_available() {
                    note(
                        &mut notes,
                        format!(
                            "skipping {}: {} support is not available (enable the '{}' feature)",
                            path.display(),
                            format.name(),
                            format.feature().unwrap_or("default")
                        ),
                    );
                    return false;
                }
                true
            })
            .collect();

        let preferred = self.preferred_format(&base);

        let (target_format, source_format) = if let Some(preferred) = preferred {
            let source = if existing.contains(&preferred) {
                None
            } else {
                match existing.len() {
                    0 => None,
                    1 => Some(existing[0]),
                    _ => {
                        let chosen = choose_migration_source(&base, &existing);
                        note(
                            &mut notes,
                            format!(
                                "multiple config formats found for {} ({}); migrating the most recently modified ({chosen}) into {preferred}",
                                base.display(),
                                list_formats(&existing)
                            ),
                        );
                        Some(chosen)
                    }
                }
            };
            (preferred, source)
        } else if existing.contains(&default) {
            (default, None)
        } else if existing.len() == 1 {
            (existing[0], None)
        } else if existing.len() > 1 {
            let chosen = existing[0];
            note(
                &mut notes,
                format!(
                    "multiple config formats found for {} ({}); using {chosen}. Create {}.{FORMAT_FILE_SUFFIX} or set {FORMAT_ENV} to pick one",
                    base.display(),
                    list_formats(&existing),
                    base.display()
                ),
            );
            (chosen, None)
        } else {
            (default, None)
        };

        Ok(FormatDecision {
            target: with_extension(&base, target_format),
            relative: format!("{base_relative}.{target_format}"),
            target_format,
            source: source_format.map(|format| with_extension(&base, format)),
            source_format,
            notes,
        })
    }

    /// Preferred format: sibling file, then property, then environment, then
    /// the root-level file.
    fn preferred_format(&self, base: &Path) -> Option<Format> {
        let sibling = append_suffix(base, FORMAT_FILE_SUFFIX);
        read_format_file(&sibling)
            .or(self.prefs.property)
            .or(self.prefs.env)
            .or_else(|| read_format_file(&self.root.join(GLOBAL_FORMAT_FILE)))
    }

    /// Join a relative path onto the root and reject anything that escapes.
    ///
    /// Returns the absolute path and the `/`-separated path relative to the
    /// root.
    pub fn sandbox(&self, path: &str) -> ConfigResult<(PathBuf, String)> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize(&joined);
        let Ok(relative) = normalized.strip_prefix(&self.root) else {
            return Err(ConfigError::PathTraversal {
                path: path.to_string(),
            });
        };
        if relative.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: path.to_string(),
                reason: "path resolves to the config root itself".to_string(),
            });
        }
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok((normalized, relative))
    }
}

fn note(notes: &mut Vec<String>, message: String) {
    tracing::warn!("[resolver] {message}");
    notes.push(message);
}

fn list_formats(formats: &[Format]) -> String {
    formats
        .iter()
        .map(|f| f.extension())
        .collect::<Vec<_>>()
        .join(", ")
}

fn with_extension(base: &Path, format: Format) -> PathBuf {
    append_suffix(base, format.extension())
}

fn append_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

/// Most recently modified candidate; the first one on ties or when a
/// modification time cannot be read.
fn choose_migration_source(base: &Path, candidates: &[Format]) -> Format {
    let mut best: Option<(SystemTime, Format)> = None;
    for format in candidates {
        let modified = fs::metadata(with_extension(base, *format)).and_then(|m| m.modified());
        let Ok(modified) = modified else {
            return candidates[0];
        };
        if best.is_none_or(|(time, _)| modified > time) {
            best = Some((modified, *format));
        }
    }
    best.map_or(candidates[0], |(_, format)| format)
}

/// Read an override file: the first line that is not blank and not a `#` or
/// `//` comment names the extension.
pub fn read_format_file(path: &Path) -> Option<Format> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("[resolver] cannot read {}: {e}", path.display());
            return None;
        }
    };
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))?;
    preference_from(line, &path.display().to_string())
}

/// Replace `{name}` placeholders. The reserved `ext` placeholder is left in
/// place for the resolver.
pub fn apply_placeholders(template: &str, placeholders: &IndexMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in placeholders {
        if name == EXT_PLACEHOLDER {
            continue;
        }
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Build a placeholder map from `key, value` pairs.
pub fn placeholders_from_pairs(pairs: &[&str]) -> ConfigResult<IndexMap<String, String>> {
    if pairs.len() % 2 != 0 {
        return Err(ConfigError::InvalidPath {
            path: pairs.join(", "),
            reason: "placeholders must be given as key, value pairs".to_string(),
        });
    }
    Ok(pairs
        .chunks(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

/// Lexically normalize a path, dropping `.` and folding `..`.
///
/// `..` above the filesystem root is kept, so such paths never pass the
/// sandbox prefix check.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn prefs(default: Format) -> FormatPreferences {
        FormatPreferences {
            explicit_default: None,
            platform_default: default,
            property: None,
            env: None,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_sandbox_rejects_escape() {
        let resolver = Resolver::new("/srv/app", prefs(Format::Jsonc));
        let err = resolver.sandbox("../etc/passwd").unwrap_err();
        assert!(matches!(err, ConfigError::PathTraversal { .. }));
        let err = resolver.sandbox("/etc/passwd").unwrap_err();
        assert!(matches!(err, ConfigError::PathTraversal { .. }));

        let (abs, rel) = resolver.sandbox("conf/./sub/../main.json").unwrap();
        assert_eq!(abs, PathBuf::from("/srv/app/conf/main.json"));
        assert_eq!(rel, "conf/main.json");
    }

    #[test]
    fn test_fixed_path_without_token() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Jsonc));
        let decision = resolver.resolve("fixed/app.json").unwrap();
        assert_eq!(decision.target, temp_dir.path().join("fixed/app.json"));
        assert_eq!(decision.target_format, Format::Json);
        assert!(decision.source.is_none());
    }

    #[test]
    fn test_nothing_exists_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Jsonc));
        let decision = resolver.resolve("app.{ext}").unwrap();
        assert_eq!(decision.target_format, Format::Jsonc);
        assert_eq!(decision.relative, "app.jsonc");

        let explicit = Resolver::new(
            temp_dir.path(),
            prefs(Format::Jsonc).with_explicit_default(Some("json")),
        );
        assert_eq!(explicit.resolve("app.{ext}").unwrap().target_format, Format::Json);
    }

    #[test]
    fn test_single_existing_format_wins() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("app.json"), "{}").unwrap();
        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Jsonc));
        let decision = resolver.resolve("app.{ext}").unwrap();
        assert_eq!(decision.target_format, Format::Json);
        assert!(decision.notes.is_empty());
    }

    #[test]
    fn test_ambiguous_picks_priority_and_warns() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("app.jsonc"), "{}").unwrap();
        fs::write(temp_dir.path().join("app.json"), "{}").unwrap();
        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Toml));
        let decision = resolver.resolve("app.{ext}").unwrap();
        assert_eq!(decision.target_format, Format::Jsonc);
        assert_eq!(decision.notes.len(), 1);
        assert!(decision.notes[0].contains("multiple config formats"));
    }

    #[test]
    fn test_sibling_override_migrates_single_source() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("app.jsonc"), "{}").unwrap();
        fs::write(temp_dir.path().join("app.format"), "# choose\n\n.JSON\n").unwrap();
        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Jsonc));
        let decision = resolver.resolve("app.{ext}").unwrap();
        assert_eq!(decision.target_format, Format::Json);
        assert_eq!(decision.source_format, Some(Format::Jsonc));
        assert_eq!(decision.source, Some(temp_dir.path().join("app.jsonc")));
    }

    #[test]
    fn test_override_precedence() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(GLOBAL_FORMAT_FILE), "jsonc\n").unwrap();
        let mut p = prefs(Format::Jsonc);
        p.env = Some(Format::Json);
        let resolver = Resolver::new(temp_dir.path(), p.clone());
        assert_eq!(resolver.resolve("a.{ext}").unwrap().target_format, Format::Json);

        p.property = Some(Format::Jsonc);
        let resolver = Resolver::new(temp_dir.path(), p);
        assert_eq!(resolver.resolve("a.{ext}").unwrap().target_format, Format::Jsonc);

        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Json));
        assert_eq!(resolver.resolve("a.{ext}").unwrap().target_format, Format::Jsonc);
    }

    #[test]
    fn test_unknown_override_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("app.format"), "ini\n").unwrap();
        let resolver = Resolver::new(temp_dir.path(), prefs(Format::Json));
        assert_eq!(resolver.resolve("app.{ext}").unwrap().target_format, Format::Json);
    }

    #[test]
    fn test_preferred_present_means_no_migration() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("app.jsonc"), "{}").unwrap();
        fs::write(temp_dir.path().join("app.json"), "{}").unwrap();
        let mut p = prefs(Format::Jsonc);
        p.property = Some(Format::Json);
        let decision = Resolver::new(temp_dir.path(), p).resolve("app.{ext}").unwrap();
        assert_eq!(decision.target_format, Format::Json);
        assert!(!decision.needs_migration());
    }

    #[test]
    fn test_newest_source_is_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let older = temp_dir.path().join("app.jsonc");
        let newer = temp_dir.path().join("app.json");
        fs::write(&older, "{}").unwrap();
        fs::write(&newer, "{}").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let candidates = [Format::Jsonc, Format::Json];
        let base = temp_dir.path().join("app");
        assert_eq!(choose_migration_source(&base, &candidates), Format::Json);
    }

    #[test]
    fn test_placeholders() {
        let map = placeholders_from_pairs(&["name", "alpha", "ext", "json"]).unwrap();
        assert_eq!(
            apply_placeholders("plugins/{name}/cfg.{ext}", &map),
            "plugins/alpha/cfg.{ext}"
        );
        assert!(placeholders_from_pairs(&["odd"]).is_err());
    }
}
