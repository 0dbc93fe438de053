use std::{
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command as StdCommand, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::{cargo::CommandCargoExt, Command};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn init() -> Command {
    Command::cargo_bin("logship-init").unwrap()
}

#[test]
fn mirrors_output_once() {
    init()
        .args(&["--", "sh", "-c", "echo hello; echo oops >&2"])
        .assert()
        .success()
        .stdout("hello\n");
}

#[test]
fn propagates_exit_code() {
    init().args(&["--", "sh", "-c", "exit 3"]).assert().code(3);
}

#[test]
fn signal_death_is_128_plus_n() {
    init()
        .args(&["--", "sh", "-c", "kill -TERM $$"])
        .assert()
        .code(143);
}

#[test]
fn missing_program_fails() {
    let output = init()
        .args(&["--", "/nonexistent/program"])
        .assert()
        .code(1)
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/program"), "{}", stderr);
}

#[test]
fn forwards_signals_to_the_child() {
    let mut supervisor = StdCommand::cargo_bin("logship-init")
        .unwrap()
        .args(&[
            "--",
            "sh",
            "-c",
            "trap 'echo got-int; exit 7' INT; echo ready; while true; do sleep 0.1; done",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(supervisor.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "ready\n");

    kill(Pid::from_raw(supervisor.id() as i32), Signal::SIGINT).unwrap();

    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "got-int\n");
    assert_eq!(supervisor.wait().unwrap().code(), Some(7));
}

#[test]
fn bad_credentials_stop_before_the_child_runs() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");

    let output = init()
        .arg("--server")
        .arg("127.0.0.1:1")
        .arg("--cert")
        .arg("/nonexistent/client.pem")
        .arg("--key")
        .arg(fixture("client-key.pem"))
        .arg("--ca-cert")
        .arg(fixture("ca.pem"))
        .arg("--")
        .arg("touch")
        .arg(&marker)
        .assert()
        .failure()
        .get_output()
        .clone();

    assert!(!marker.exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/client.pem"), "{}", stderr);
}

#[test]
fn single_dash_flags_are_accepted() {
    init()
        .arg("-server")
        .arg("127.0.0.1:1")
        .arg("-cert")
        .arg(fixture("client.pem"))
        .arg("-key")
        .arg(fixture("client-key.pem"))
        .arg("-ca-cert")
        .arg(fixture("ca.pem"))
        .args(&["--", "echo", "hi"])
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn unreachable_collector_does_not_hold_up_the_child() {
    let started = Instant::now();
    init()
        .arg("--server")
        .arg("127.0.0.1:1")
        .arg("--cert")
        .arg(fixture("client.pem"))
        .arg("--key")
        .arg(fixture("client-key.pem"))
        .arg("--ca-cert")
        .arg(fixture("ca.pem"))
        .args(&["--", "sh", "-c", "echo one; sleep 1; echo two"])
        .assert()
        .success()
        .stdout("one\ntwo\n");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn descendants_holding_output_do_not_block_exit() {
    let started = Instant::now();
    init()
        .args(&[
            "--output-grace",
            "200",
            "--",
            "sh",
            "-c",
            "sleep 30 & echo started",
        ])
        .assert()
        .success()
        .stdout("started\n");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn forwarded_sigterm_kills_a_plain_child() {
    let mut supervisor = StdCommand::cargo_bin("logship-init")
        .unwrap()
        .args(&["--", "sh", "-c", "echo ready; exec sleep 30"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(supervisor.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "ready\n");

    kill(Pid::from_raw(supervisor.id() as i32), Signal::SIGTERM).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = supervisor.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = supervisor.kill();
            panic!("supervisor still running 10s after SIGTERM");
        }
        thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(143));
}

#[cfg(target_os = "linux")]
#[test]
fn orphan_exit_does_not_end_supervision() {
    // The inner subshell exits at once, leaving `exit 4` to be adopted.
    let output = init()
        .args(&[
            "--subreaper",
            "-v",
            "--",
            "sh",
            "-c",
            "(sh -c 'sleep 0.1; exit 4' &); sleep 1; echo done",
        ])
        .assert()
        .success()
        .stdout("done\n")
        .get_output()
        .clone();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Reaped orphaned process"), "{}", stderr);
}
