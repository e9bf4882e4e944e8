use std::collections::HashSet;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use libc::pid_t;
use log::{debug, error, trace, warn};
use parking_lot::RwLock;
use crate::data::Observations;
use crate::error::{Error, Result};
use crate::probe::{Probe, ProbeError, Procfs};

/// Pause after a failed tick when no interval is configured, so a socket
/// table that stays unreadable does not spin a core.
const BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub pid:      pid_t,
    pub children: bool,
    pub interval: Option<Duration>,
}

impl Config {
    pub fn new(pid: pid_t) -> Self {
        Self { pid, children: true, interval: None }
    }

    pub fn current() -> Self {
        Self::new(std::process::id() as pid_t)
    }

    pub fn children(mut self, children: bool) -> Self {
        self.children = children;
        self
    }

    pub fn interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval;
        self
    }
}

/// Polls the socket table in a background thread and records every
/// connection owned by the watched process tree.
///
/// A tracker runs once: `start` spawns the poll thread, `stop` joins it,
/// and after that the observations are final.
pub struct Tracker<P = Procfs> {
    shared: Arc<Shared<P>>,
    state:  State,
}

struct Shared<P> {
    config: Config,
    probe:  P,
    table:  RwLock<Observations>,
    stop:   AtomicBool,
    ticks:  AtomicUsize,
    denied: AtomicUsize,
}

enum State {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

impl Tracker<Procfs> {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_probe(config, Procfs)
    }
}

impl<P: Probe + 'static> Tracker<P> {
    pub fn with_probe(config: Config, probe: P) -> Result<Self> {
        if !probe.exists(config.pid) {
            return Err(Error::ProcessNotFound(config.pid));
        }

        let shared = Arc::new(Shared {
            config: config,
            probe:  probe,
            table:  RwLock::new(Observations::new()),
            stop:   AtomicBool::new(false),
            ticks:  AtomicUsize::new(0),
            denied: AtomicUsize::new(0),
        });

        Ok(Self { shared, state: State::Idle })
    }

    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(Error::AlreadyStarted);
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("nettracker-poll".to_owned())
            .spawn(move || shared.run())
            .map_err(Error::Spawn)?;

        debug!("tracking pid {} ({:?})", self.shared.config.pid, self.shared.config);
        self.state = State::Running(handle);

        Ok(())
    }

    /// Starts tracking and returns a guard that stops it when dropped.
    pub fn session(&mut self) -> Result<Session<'_, P>> {
        self.start()?;
        Ok(Session { tracker: self })
    }
}

impl<P> Tracker<P> {
    /// Signals the poll thread and waits for it to exit. Once this returns
    /// the observations no longer change.
    pub fn stop(&mut self) {
        if let State::Running(handle) = mem::replace(&mut self.state, State::Stopped) {
            self.shared.stop.store(true, Ordering::Release);

            if handle.join().is_err() {
                error!("poll thread panicked");
            }

            debug!(
                "stopped after {} ticks ({} denied), {} connections",
                self.ticks(),
                self.denied(),
                self.shared.table.read().len(),
            );
        }
    }

    pub fn snapshot(&self) -> Observations {
        self.shared.table.read().clone()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// Completed ticks, including ticks that found nothing.
    pub fn ticks(&self) -> usize {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Ticks abandoned because the socket table could not be read.
    pub fn denied(&self) -> usize {
        self.shared.denied.load(Ordering::Acquire)
    }
}

impl<P> Drop for Tracker<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: Probe> Shared<P> {
    fn run(&self) {
        while !self.stop.load(Ordering::Acquire) {
            match self.tick() {
                Ok(added) => {
                    self.ticks.fetch_add(1, Ordering::AcqRel);
                    if added > 0 {
                        trace!("recorded {} new connections", added);
                    }
                    match self.config.interval {
                        Some(interval) => thread::sleep(interval),
                        None           => thread::yield_now(),
                    }
                }
                Err(ProbeError::PermissionDenied(e)) => {
                    self.denied.fetch_add(1, Ordering::AcqRel);
                    trace!("socket table denied: {}", e);
                    thread::sleep(self.config.interval.unwrap_or(BACKOFF));
                }
                Err(e) => {
                    warn!("tick failed: {}", e);
                    thread::sleep(self.config.interval.unwrap_or(BACKOFF));
                }
            }
        }
    }

    fn tick(&self) -> Result<usize, ProbeError> {
        let watch   = self.watch();
        let sockets = self.probe.sockets()?;

        let mut table = self.table.write();
        let mut added = 0;

        for socket in sockets {
            match socket.pid {
                Some(pid) if watch.contains(&pid) => {
                    if table.insert(socket.conn) {
                        added += 1;
                    }
                }
                _ => (),
            }
        }

        Ok(added)
    }

    fn watch(&self) -> HashSet<pid_t> {
        let root = self.config.pid;

        let mut pids = HashSet::new();
        pids.insert(root);

        if self.config.children {
            match self.probe.descendants(root) {
                Ok(children)                      => pids.extend(children),
                Err(ProbeError::NoSuchProcess(_)) => (),
                Err(e)                            => trace!("children of {}: {}", root, e),
            }
        }

        pids
    }
}

/// A running tracker. Dropping the session stops it, on every exit path.
pub struct Session<'a, P> {
    tracker: &'a mut Tracker<P>,
}

impl<P> Session<'_, P> {
    /// Stops tracking now and returns the final observations.
    pub fn finish(self) -> Observations {
        self.tracker.stop();
        self.tracker.snapshot()
    }
}

impl<P> Deref for Session<'_, P> {
    type Target = Tracker<P>;

    fn deref(&self) -> &Self::Target {
        &*self.tracker
    }
}

impl<P> Drop for Session<'_, P> {
    fn drop(&mut self) {
        self.tracker.stop();
    }
}
