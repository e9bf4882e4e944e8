use std::collections::{HashMap, HashSet, VecDeque};
use libc::pid_t;
use parking_lot::Mutex;
use super::{Probe, ProbeError, Socket};

/// A probe that replays a fixed sequence of socket-table results, one per
/// call. Once the script runs out the last successful table repeats.
#[derive(Default)]
pub struct Scripted {
    alive:    Mutex<HashSet<pid_t>>,
    children: HashMap<pid_t, Vec<pid_t>>,
    script:   Mutex<Script>,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    last:  Vec<Socket>,
    calls: usize,
}

enum Step {
    Table(Vec<Socket>),
    Denied,
    Fails,
}

impl Scripted {
    pub fn new(root: pid_t) -> Self {
        let alive = Mutex::new(HashSet::from([root]));
        Self { alive, ..Self::default() }
    }

    pub fn child(mut self, parent: pid_t, pid: pid_t) -> Self {
        self.alive.get_mut().insert(pid);
        self.children.entry(parent).or_default().push(pid);
        self
    }

    pub fn table(self, sockets: Vec<Socket>) -> Self {
        self.script.lock().steps.push_back(Step::Table(sockets));
        self
    }

    pub fn denied(self) -> Self {
        self.script.lock().steps.push_back(Step::Denied);
        self
    }

    /// Queues a query that fails for a reason other than privilege.
    pub fn fails(self) -> Self {
        self.script.lock().steps.push_back(Step::Fails);
        self
    }

    /// Marks `pid` as exited. Sockets already scripted for it still appear.
    pub fn kill(&self, pid: pid_t) {
        self.alive.lock().remove(&pid);
    }

    /// Number of socket-table queries answered so far.
    pub fn calls(&self) -> usize {
        self.script.lock().calls
    }

    /// True once every scripted step has been consumed.
    pub fn finished(&self) -> bool {
        self.script.lock().steps.is_empty()
    }
}

impl Probe for Scripted {
    fn exists(&self, pid: pid_t) -> bool {
        self.alive.lock().contains(&pid)
    }

    fn descendants(&self, pid: pid_t) -> Result<Vec<pid_t>, ProbeError> {
        if !self.exists(pid) {
            return Err(ProbeError::NoSuchProcess(pid));
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::from(vec![pid]);

        while let Some(next) = queue.pop_front() {
            for &child in self.children.get(&next).into_iter().flatten() {
                found.push(child);
                queue.push_back(child);
            }
        }

        Ok(found)
    }

    fn sockets(&self) -> Result<Vec<Socket>, ProbeError> {
        let mut script = self.script.lock();
        script.calls += 1;

        match script.steps.pop_front() {
            Some(Step::Table(sockets)) => {
                script.last = sockets.clone();
                Ok(sockets)
            }
            Some(Step::Denied) => {
                Err(ProbeError::PermissionDenied("scripted".to_owned()))
            }
            Some(Step::Fails) => {
                Err(ProbeError::Other("scripted failure".to_owned()))
            }
            None => Ok(script.last.clone()),
        }
    }
}
