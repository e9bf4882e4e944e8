//! Access to the operating system's view of processes and sockets.
//!
//! The tracker only needs two questions answered: which processes belong
//! to the tree rooted at a pid, and which sockets exist right now. Both
//! live behind [`Probe`] so the poll loop can be driven by `/proc` in
//! production and by a [`Scripted`] sequence in tests.

use libc::pid_t;
use thiserror::Error;
use crate::data::Connection;

pub mod linux;
pub mod script;

pub use linux::Procfs;
pub use script::Scripted;

/// A socket-table row. The owner is absent when no visible process holds
/// a descriptor for the socket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Socket {
    pub pid:  Option<pid_t>,
    pub conn: Connection,
}

impl Socket {
    pub fn owned(conn: Connection) -> Self {
        Self { pid: Some(conn.pid), conn }
    }

    pub fn orphan(mut conn: Connection) -> Self {
        conn.pid = -1;
        conn.fd  = -1;
        Self { pid: None, conn }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no such process: {0}")]
    NoSuchProcess(pid_t),
    #[error("{0}")]
    Other(String),
}

pub trait Probe: Send + Sync {
    fn exists(&self, pid: pid_t) -> bool;

    /// Live descendants of `pid`, excluding `pid` itself.
    fn descendants(&self, pid: pid_t) -> Result<Vec<pid_t>, ProbeError>;

    /// Every socket currently known to the system, of all families.
    fn sockets(&self) -> Result<Vec<Socket>, ProbeError>;
}

impl<P: Probe + ?Sized> Probe for std::sync::Arc<P> {
    fn exists(&self, pid: pid_t) -> bool {
        (**self).exists(pid)
    }

    fn descendants(&self, pid: pid_t) -> Result<Vec<pid_t>, ProbeError> {
        (**self).descendants(pid)
    }

    fn sockets(&self) -> Result<Vec<Socket>, ProbeError> {
        (**self).sockets()
    }
}

/// Warning to show before tracking when the platform hides sockets from
/// unprivileged users.
pub fn advisory(os: &str, euid: u32) -> Option<&'static str> {
    match (os, euid) {
        ("macos", euid) if euid != 0 => {
            Some("Darwin platform users need to run this program as a privileged user.")
        }
        _ => None,
    }
}

/// [`advisory`] for the running process.
pub fn local_advisory() -> Option<&'static str> {
    let euid = procfs::process::Process::myself()
        .and_then(|p| p.status())
        .map(|s| s.euid)
        .unwrap_or(0);
    advisory(std::env::consts::OS, euid)
}
