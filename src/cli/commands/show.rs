//! Show command.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};

use crate::formats::{self, Format};

/// Render a file, or one value from it, the way `show` prints it.
pub fn render(file: &Path, path: Option<&str>) -> Result<String> {
    let Some(format) = Format::from_path(file) else {
        bail!("{} has no recognised config extension", file.display());
    };
    if !file.is_file() {
        bail!("{} does not exist", file.display());
    }
    let doc = formats::read_as(file, format)
        .with_context(|| format!("failed to read {}", file.display()))?;

    match path {
        Some(path) => {
            let value = doc
                .get(path)
                .ok_or_else(|| anyhow!("'{path}' not found in {}", file.display()))?;
            Ok(serde_json::to_string_pretty(value)?)
        }
        None => format.render(&doc).map_err(|reason| anyhow!(reason)),
    }
}

pub fn run(file: &Path, path: Option<&str>) -> Result<()> {
    let text = render(file, path)?;
    println!("{}", text.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_show_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.toml");
        std::fs::write(&file, "[server]\nport = 8080\nhosts = [\"a\", \"b\"]\n").unwrap();

        assert_eq!(render(&file, Some("server.port")).unwrap(), "8080");
        assert!(render(&file, Some("server.hosts")).unwrap().contains("\"b\""));
        assert!(render(&file, Some("server.missing")).is_err());
    }

    #[test]
    fn test_show_whole_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.yaml");
        std::fs::write(&file, "name: demo\n").unwrap();
        assert!(render(&file, None).unwrap().contains("name: demo"));
    }
}
