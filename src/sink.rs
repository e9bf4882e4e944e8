use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use anyhow::Error;

/// Where a finished report goes.
pub enum Sink {
    Stdout,
    File(PathBuf),
    Writer(Box<dyn Write + Send>),
}

impl Sink {
    pub fn writer<W: Write + Send + 'static>(w: W) -> Self {
        Self::Writer(Box::new(w))
    }

    pub fn write(&mut self, report: &str) -> io::Result<()> {
        match self {
            Self::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(report.as_bytes())?;
                out.flush()
            }
            Self::File(path) => fs::write(path, report),
            Self::Writer(w)  => {
                w.write_all(report.as_bytes())?;
                w.flush()
            }
        }
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::Stdout
    }
}

impl FromStr for Sink {
    type Err = Error;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        match arg {
            "" | "-" => Ok(Self::Stdout),
            path     => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout     => f.write_str("Stdout"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Writer(_)  => f.write_str("Writer"),
        }
    }
}
