use confkit::document::Document;
use confkit::formats::{self, SUPPORTED};
use confkit::{Format, Mapping, Value};
use tempfile::TempDir;

fn sample() -> Document {
    let mut doc = Document::new();
    doc.set_header(vec!["Generated settings".into()]);
    doc.set_version("3");
    doc.set_commented("name", Value::from("demo"), &["Display name".into()]);
    doc.set("enabled", Value::Bool(true));
    doc.set("ratio", Value::Float(0.5));
    doc.set(
        "tags",
        Value::List(vec![Value::from("a"), Value::from("b c")]),
    );
    doc.set_commented("db.url", Value::from("postgres://db/app"), &["Connection".into()]);
    doc.set("db.pool.size", Value::Int(4));
    doc
}

fn keys(map: &Mapping) -> Vec<&str> {
    map.keys().map(String::as_str).collect()
}

#[test]
fn test_every_format_keeps_values_and_order() {
    let temp_dir = TempDir::new().unwrap();
    let doc = sample();

    for format in SUPPORTED.into_iter().filter(|f| f.is_available()) {
        let path = temp_dir.path().join(format!("app.{format}"));
        formats::write_as(&path, format, &doc).unwrap();
        let back = formats::read(&path).unwrap();

        assert_eq!(back.root(), doc.root(), "values differ for {format}");
        assert_eq!(
            keys(back.root()),
            vec!["config-version", "name", "enabled", "ratio", "tags", "db"],
            "key order differs for {format}"
        );
        assert_eq!(
            keys(back.section("db").unwrap()),
            vec!["url", "pool"],
            "section order differs for {format}"
        );
    }
}

#[test]
fn test_comments_survive_where_supported() {
    let temp_dir = TempDir::new().unwrap();
    let doc = sample();

    for format in SUPPORTED.into_iter().filter(|f| f.is_available()) {
        let path = temp_dir.path().join(format!("commented.{format}"));
        formats::write_as(&path, format, &doc).unwrap();
        let back = formats::read(&path).unwrap();

        if format.supports_comments() {
            assert_eq!(back.header(), doc.header(), "header lost for {format}");
            assert_eq!(back.comment("name"), Some(&["Display name".to_string()][..]));
            assert_eq!(back.comment("db.url"), Some(&["Connection".to_string()][..]));
        } else {
            assert!(back.header().is_empty());
            assert!(back.comments().is_empty());
        }
    }
}

#[test]
fn test_json_is_the_only_commentless_format() {
    let without: Vec<Format> = SUPPORTED
        .into_iter()
        .filter(|f| !f.supports_comments())
        .collect();
    assert_eq!(without, vec![Format::Json]);
}

#[test]
fn test_conversion_between_formats() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("source.jsonc");
    formats::write(&source, &sample()).unwrap();

    let doc = formats::read(&source).unwrap();
    for target in ["yaml", "toml", "json"] {
        let format = Format::from_extension(target).unwrap();
        if !format.is_available() {
            continue;
        }
        let path = temp_dir.path().join(format!("target.{target}"));
        formats::write(&path, &doc).unwrap();
        assert_eq!(formats::read(&path).unwrap().root(), doc.root());
    }
}
