//! End-to-end tests of the hogp-bridge binary

use std::io::Write;
use std::process::{Command, Stdio};

fn bridge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_hogp-bridge"))
}

#[test]
fn test_print_config_emits_loadable_toml() {
    let output = bridge().arg("print-config").output().unwrap();
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).unwrap();
    let config: hogp_cli::AppConfig = toml::from_str(&text).unwrap();
    assert!(config.validate().is_ok());
}

#[test]
fn test_describe_prints_layout() {
    let output = bridge().arg("describe").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("Report map"));
    assert!(text.contains("ProtocolMode"));
}

#[test]
fn test_dry_run_consumes_stdin_and_exits() {
    let mut child = bridge()
        .args(["run", "--dry-run", "--name", "Test Keyboard"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    {
        let mut stdin = child.stdin.take().unwrap();
        writeln!(stdin, r#"{{"kind":"key_press","code":4}}"#).unwrap();
        writeln!(stdin, "not json").unwrap();
        writeln!(stdin, r#"{{"kind":"key_release","code":4}}"#).unwrap();
    }

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let logs = String::from_utf8_lossy(&output.stderr);
    assert!(logs.contains("Test Keyboard"));
}

#[test]
fn test_missing_config_file_fails() {
    let output = bridge()
        .args(["describe", "--config", "/nonexistent/hogp-bridge.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
