use std::process::Command;
use tempfile::TempDir;

fn confkit() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_confkit"));
    cmd.env_remove("CONFKIT_CONFIG_FORMAT")
        .env_remove("CONFKIT_SETTINGS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_resolve_command() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("app.json"), "{}").unwrap();

    let output = confkit()
        .args(["resolve", "{kind}.{ext}", "--format", "toml", "--set", "kind=app", "--root"])
        .arg(temp_dir.path())
        .output()
        .expect("Failed to run resolve command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.toml"));
    assert!(stdout.contains("migrate:"));
}

#[test]
fn test_convert_and_show_commands() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("app.yaml");
    let output_path = temp_dir.path().join("app.jsonc");
    std::fs::write(&input, "# App\nserver:\n  port: 8080\n").unwrap();

    let output = confkit()
        .arg("convert")
        .arg(&input)
        .arg(&output_path)
        .output()
        .expect("Failed to run convert command");
    assert!(output.status.success());
    assert!(output_path.exists());

    let output = confkit()
        .arg("show")
        .arg(&output_path)
        .args(["--path", "server.port"])
        .output()
        .expect("Failed to run show command");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "8080");
}

#[test]
fn test_show_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = confkit()
        .arg("show")
        .arg(temp_dir.path().join("absent.toml"))
        .output()
        .expect("Failed to run show command");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
