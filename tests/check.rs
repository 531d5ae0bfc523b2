use std::process::Command;

const EXE: &str = env!("CARGO_BIN_EXE_backhaul");

#[test]
fn check_runs_every_local_worker() {
    let output = Command::new(EXE)
        .args([
            "--stanza=demo",
            "--process-max=3",
            "--log-level-file=off",
            "--log-level-console=off",
            "check",
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "check passed: 3 local worker(s) responded"
    );
}

#[test]
fn worker_exits_on_eof() {
    let output = Command::new(EXE)
        .args(["--log-level-file=off", "--log-level-stderr=off", "--process=1", "local"])
        .stdin(std::process::Stdio::null())
        .output()
        .unwrap();

    // greeting first, then the read fails
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(r#"{"name":"backhaul","service":"local","version":""#));
}

#[test]
fn failure_is_reported_once() {
    let output = Command::new(EXE)
        .args(["--log-level-file=off", "--process=1", "local"])
        .stdin(std::process::Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("unexpected eof reading from 'stdin'").count(), 1, "{stderr}");
}

#[test]
fn unknown_command_is_rejected() {
    let output = Command::new(EXE).args(["archive-get"]).output().unwrap();
    assert!(!output.status.success());
}
