use std::time::Duration;
use log::{debug, warn};
use crate::error::Error;
use crate::probe::local_advisory;
use crate::report::{self, Options};
use crate::sink::Sink;
use crate::track::{Config, Tracker};

/// Runs a closure under a tracker watching the current process and writes
/// the connection report once the closure succeeds.
///
/// ```no_run
/// use std::net::TcpStream;
/// use nettracker::{Instrument, Sink};
///
/// let stream = Instrument::new()
///     .sink("connections.txt".parse::<Sink>()?)
///     .run(|| TcpStream::connect("example.com:80").map_err(nettracker::Error::from))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Instrument {
    config:  Config,
    options: Options,
    sink:    Sink,
    json:    bool,
}

impl Instrument {
    pub fn new() -> Self {
        Self {
            config:  Config::current(),
            options: Options::default(),
            sink:    Sink::default(),
            json:    false,
        }
    }

    pub fn interval(mut self, interval: Option<Duration>) -> Self {
        self.config = self.config.interval(interval);
        self
    }

    pub fn children(mut self, children: bool) -> Self {
        self.config = self.config.children(children);
        self
    }

    pub fn alias(mut self, alias: bool) -> Self {
        self.options.alias = alias;
        self
    }

    pub fn width(mut self, width: Option<usize>) -> Self {
        self.options.width = width;
        self
    }

    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Calls `f` while tracking. If `f` fails or panics the tracker is
    /// still stopped, and no report is written.
    pub fn run<F, T, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<Error>,
    {
        if let Some(warning) = local_advisory() {
            warn!("{}", warning);
        }

        let mut tracker = Tracker::new(self.config.clone())?;

        let value = {
            let _session = tracker.session()?;
            f()?
        };

        let obs = tracker.snapshot();
        debug!("instrumented call opened {} connections", obs.len());

        let report = match self.json {
            true  => report::render_json(&obs, self.config.pid)?,
            false => report::render(&obs, self.config.pid, &self.options),
        };
        self.sink.write(&report).map_err(Error::from)?;

        Ok(value)
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Instrument::run`] with default settings, reporting to stdout.
pub fn instrument<F, T, E>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<Error>,
{
    Instrument::new().run(f)
}

#[cfg(test)]
mod tests {
    use std::io;
    use crate::testing::Capture;
    use super::*;

    #[test]
    fn returns_value_and_writes_report() {
        let capture = Capture::default();
        let value   = Instrument::new()
            .alias(false)
            .width(Some(20))
            .sink(Sink::writer(capture.clone()))
            .run(|| Ok::<_, Error>(42))
            .unwrap();

        assert_eq!(value, 42);
        assert!(capture.contents().starts_with(&"#".repeat(20)));
        assert!(capture.contents().contains("Connection summary:"));
    }

    #[test]
    fn failure_skips_report() {
        #[derive(Debug)]
        enum Failure {
            Workload,
            Tracker,
        }

        impl From<Error> for Failure {
            fn from(_: Error) -> Self {
                Self::Tracker
            }
        }

        let capture = Capture::default();
        let result  = Instrument::new()
            .sink(Sink::writer(capture.clone()))
            .run(|| Err::<(), _>(Failure::Workload));

        assert!(matches!(result, Err(Failure::Workload)));
        assert!(capture.contents().is_empty());
    }

    #[test]
    fn io_errors_pass_through() {
        let capture = Capture::default();
        let result  = Instrument::new()
            .sink(Sink::writer(capture.clone()))
            .run(|| -> Result<(), Error> {
                Err(io::Error::new(io::ErrorKind::Other, "boom").into())
            });

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(capture.contents().is_empty());
    }
}
