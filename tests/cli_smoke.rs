use std::process::Output;

use assert_cmd::Command;
use sprocket::config::{Config, Mode};
use tempfile::TempDir;

fn run(args: &[&str]) -> Output {
    Command::cargo_bin("sprocket")
        .expect("binary builds")
        .args(args)
        .output()
        .expect("binary runs")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_lists_the_commands() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["list", "add", "remove", "start", "stop", "verify"] {
        assert!(stdout.contains(command), "help is missing '{command}'");
    }
}

#[test]
fn malformed_filter_fails_before_connecting() {
    let output = run(&["list", "ratio>abc"]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("invalid filter value"),
        "stderr was: {}",
        stderr(&output)
    );
}

#[test]
fn malformed_regex_fails_before_connecting() {
    let output = run(&["list", "name~("]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("invalid regex"),
        "stderr was: {}",
        stderr(&output)
    );
}

#[test]
fn control_commands_require_filters() {
    let output = run(&["remove"]);
    assert!(!output.status.success());
}

#[test]
fn missing_torrent_file_fails_fast() {
    let output = run(&["add", "/nonexistent/fixture.torrent"]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("does not exist"),
        "stderr was: {}",
        stderr(&output)
    );
}

#[test]
fn unreachable_daemon_is_a_connection_error() {
    let tmp = TempDir::new().expect("tempdir");
    let config_path = tmp.path().join("config.toml");

    let mut config = Config::default();
    config.mode = Mode::Http;
    config.host = "127.0.0.1".to_string();
    config.port = 1;
    config.timeout_secs = 2;
    config.save(&config_path).expect("config saves");

    let output = run(&[
        "--config",
        config_path.to_str().expect("utf-8 path"),
        "list",
    ]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("connection error"),
        "stderr was: {}",
        stderr(&output)
    );
}
