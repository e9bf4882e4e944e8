use std::fs;
use std::process::Command as StdCommand;
use assert_cmd::Command;
use nettracker::testing::EchoServer;
use predicates::prelude::*;

fn nettracker() -> Command {
    Command::cargo_bin("nettracker").unwrap()
}

fn has_bash() -> bool {
    StdCommand::new("bash").arg("-c").arg("true").status().map(|s| s.success()).unwrap_or(false)
}

fn client_script(port: u16) -> String {
    format!(
        "exec 3<>/dev/tcp/127.0.0.1/{}; for i in 1 2 3 4 5 6 7 8 9 10; do printf 'hello\\n' >&3; done; sleep 0.5",
        port,
    )
}

#[test]
fn prints_version() {
    nettracker()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn requires_a_program() {
    nettracker()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No program was given to execute."));
}

#[test]
fn propagates_exit_code() {
    let dir    = tempfile::tempdir().unwrap();
    let output = dir.path().join("report.txt");

    nettracker()
        .arg("-o")
        .arg(&output)
        .args(["--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);

    let text = fs::read_to_string(&output).unwrap();
    assert!(text.contains("Connection summary:"));
}

#[test]
fn program_options_pass_through_without_separator() {
    let dir    = tempfile::tempdir().unwrap();
    let output = dir.path().join("report.txt");

    nettracker()
        .args(["--no-alias", "-o"])
        .arg(&output)
        .args(["sh", "-c", "exit 3"])
        .assert()
        .code(3);

    assert!(fs::read_to_string(&output).unwrap().contains("Connection summary:"));
}

#[test]
fn unwritable_output_keeps_child_exit_code() {
    let dir    = tempfile::tempdir().unwrap();
    let output = dir.path().join("missing").join("report.txt");

    nettracker()
        .arg("-o")
        .arg(&output)
        .args(["--", "sh", "-c", "exit 4"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("failed to write report"));

    assert!(!output.exists());
}

#[test]
fn reports_connection_to_file() {
    if !has_bash() {
        return;
    }

    let server = EchoServer::start().unwrap();
    let dir    = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.txt");

    nettracker()
        .args(["--no-alias", "-o"])
        .arg(&output)
        .args(["--", "bash", "-c"])
        .arg(client_script(server.port()))
        .assert()
        .success();

    let text = fs::read_to_string(&output).unwrap();
    assert!(text.lines().count() > 1, "output:\n{}", text);
    assert!(text.contains("(main):"), "output:\n{}", text);
    assert!(text.contains(&format!(":{}", server.port())), "output:\n{}", text);
    assert!(text.contains("AF_INET - ESTABLISHED"), "output:\n{}", text);
}

#[test]
fn writes_stdout_by_default() {
    nettracker()
        .args(["--", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Connection summary:"));
}

#[test]
fn json_report() {
    if !has_bash() {
        return;
    }

    let server = EchoServer::start().unwrap();
    let out = nettracker()
        .args(["--json", "--", "bash", "-c"])
        .arg(client_script(server.port()))
        .output()
        .unwrap();

    assert!(out.status.success());

    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let procs = value["processes"].as_object().unwrap();
    let port  = server.port() as u64;

    let seen = procs.values()
        .flat_map(|fds| fds.as_object().unwrap().values())
        .flat_map(|conns| conns.as_array().unwrap())
        .any(|conn| {
            conn["remote"].as_str().map(|r| r.ends_with(&format!(":{}", port))).unwrap_or(false)
        });
    assert!(seen, "json:\n{}", value);
}
