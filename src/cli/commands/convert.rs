//! Convert command.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::formats::{self, Format};

/// Read `input` strictly and write it to `output`, both formats chosen by
/// extension.
pub fn convert(input: &Path, output: &Path, force: bool) -> Result<(Format, Format)> {
    let Some(from) = Format::from_path(input) else {
        bail!("{} has no recognised config extension", input.display());
    };
    let Some(to) = Format::from_path(output) else {
        bail!("{} has no recognised config extension", output.display());
    };
    if !input.is_file() {
        bail!("{} does not exist", input.display());
    }
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let doc = formats::read_as(input, from)
        .with_context(|| format!("failed to read {}", input.display()))?;
    if !to.supports_comments() && (!doc.header().is_empty() || !doc.comments().is_empty()) {
        eprintln!("Warning: {to} does not keep comments; they will be dropped");
    }
    formats::write_as(output, to, &doc)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok((from, to))
}

pub fn run(input: &Path, output: &Path, force: bool) -> Result<()> {
    let (from, to) = convert(input, output, force)?;
    println!(
        "Converted {} ({from}) -> {} ({to})",
        input.display(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use tempfile::TempDir;

    #[test]
    fn test_convert_yaml_to_toml() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("app.yml");
        let output = dir.path().join("app.toml");
        std::fs::write(&input, "# server\nport: 8080\nname: demo\n").unwrap();

        let (from, to) = convert(&input, &output, false).unwrap();
        assert_eq!((from, to), (Format::Yml, Format::Toml));

        let doc = formats::read(&output).unwrap();
        assert_eq!(doc.get("port"), Some(&Value::Int(8080)));
        assert_eq!(doc.get("name").and_then(Value::as_str), Some("demo"));
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("app.json");
        let output = dir.path().join("app.yaml");
        std::fs::write(&input, "{\"a\": 1}").unwrap();
        std::fs::write(&output, "a: 2\n").unwrap();

        assert!(convert(&input, &output, false).is_err());
        convert(&input, &output, true).unwrap();
        assert_eq!(formats::read(&output).unwrap().get("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("bad.json");
        std::fs::write(&input, "{ not json").unwrap();
        assert!(convert(&input, &dir.path().join("out.yaml"), false).is_err());
    }
}
