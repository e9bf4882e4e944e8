//! Reports which network connections a process, and optionally its
//! descendants, opened while it ran.
//!
//! A [`Tracker`] polls the system socket table from a background thread
//! for as long as it runs; [`report::render`] turns what it saw into text.
//! [`Instrument`] wraps both around a closure in the current process.

pub mod data;
pub mod error;
pub mod instrument;
pub mod probe;
pub mod report;
pub mod sink;
pub mod testing;
pub mod track;

pub use data::{Connection, Family, Kind, Observations, Status};
pub use error::{Error, Result};
pub use instrument::{instrument, Instrument};
pub use report::Options;
pub use sink::Sink;
pub use track::{Config, Session, Tracker};
