use std::process::{Child, Command};
use std::thread;
use std::time::Duration;
use libc::pid_t;
use nettracker::report::{self, Options};
use nettracker::testing::{send, Capture, EchoServer};
use nettracker::{Config, Instrument, Observations, Sink, Status, Tracker};

fn has_bash() -> bool {
    Command::new("bash").arg("-c").arg("true").status().map(|s| s.success()).unwrap_or(false)
}

fn connects_to(obs: &Observations, port: u16) -> Vec<pid_t> {
    obs.connections()
        .filter(|c| c.remote.map(|a| a.port()) == Some(port))
        .map(|c| c.pid)
        .collect()
}

// Root shell whose subshell opens the connection and holds it for a second.
fn spawn_subshell_client(port: u16) -> Child {
    let script = format!(
        "(exec 3<>/dev/tcp/127.0.0.1/{}; printf hello >&3; sleep 1); sleep 0.2",
        port,
    );
    Command::new("bash").arg("-c").arg(script).spawn().unwrap()
}

#[test]
fn in_process_connection_is_reported() {
    let server = EchoServer::start().unwrap();
    let mut tracker = Tracker::new(Config::current()).unwrap();

    let obs = {
        let session = tracker.session().unwrap();
        send(server.addr(), b"Nothing interesting here.", 10).unwrap();
        while session.ticks() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        session.finish()
    };

    let me = std::process::id() as pid_t;
    assert_eq!(obs.pids().first(), Some(&me));
    assert!(obs.connections().any(|c| {
        c.status == Status::Listen && c.local.map(|a| a.port()) == Some(server.port())
    }));

    let text = report::render(&obs, me, &Options { alias: false, width: None });
    assert!(text.lines().count() > 1);
    assert!(text.contains(&format!("PID {} (main):", me)));
    assert!(text.contains(&format!(":{}", server.port())));
    assert!(text.contains("AF_INET - LISTEN"));
}

#[test]
fn children_are_followed() {
    if !has_bash() {
        return;
    }

    let server    = EchoServer::start().unwrap();
    let mut child = spawn_subshell_client(server.port());
    let root      = child.id() as pid_t;

    let mut tracker = Tracker::new(Config::new(root)).unwrap();
    {
        let _session = tracker.session().unwrap();
        child.wait().unwrap();
    }

    let pids = connects_to(&tracker.snapshot(), server.port());
    assert!(!pids.is_empty(), "no connection seen");
    assert!(pids.iter().all(|pid| *pid != root));
}

#[test]
fn children_are_ignored_on_request() {
    if !has_bash() {
        return;
    }

    let server    = EchoServer::start().unwrap();
    let mut child = spawn_subshell_client(server.port());
    let root      = child.id() as pid_t;

    let mut tracker = Tracker::new(Config::new(root).children(false)).unwrap();
    {
        let _session = tracker.session().unwrap();
        child.wait().unwrap();
    }

    assert!(connects_to(&tracker.snapshot(), server.port()).is_empty());
}

#[test]
fn missing_process_is_rejected() {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id() as pid_t;
    child.wait().unwrap();

    assert!(matches!(
        Tracker::new(Config::new(pid)),
        Err(nettracker::Error::ProcessNotFound(p)) if p == pid
    ));
}

#[test]
fn instrumented_call_reports_connection() {
    let server  = EchoServer::start().unwrap();
    let capture = Capture::default();
    let addr    = server.addr();

    let value = Instrument::new()
        .alias(false)
        .sink(Sink::writer(capture.clone()))
        .run(|| -> nettracker::Result<&str> {
            send(addr, b"Nothing interesting here.", 10)?;
            thread::sleep(Duration::from_millis(50));
            Ok("done")
        })
        .unwrap();

    assert_eq!(value, "done");

    let text = capture.contents();
    assert!(text.lines().count() > 1, "report:\n{}", text);
    assert!(text.contains(&format!(":{}", server.port())));
}
