use std::io;
use libc::pid_t;
use thiserror::Error;
use crate::probe::ProbeError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("process {0} not found")]
    ProcessNotFound(pid_t),
    #[error("tracker already started")]
    AlreadyStarted,
    #[error("failed to spawn poll thread: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
