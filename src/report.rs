use std::collections::HashMap;
use std::fmt::Write;
use std::io::{self, IsTerminal};
use std::net::{IpAddr, SocketAddr};
use crossterm::terminal;
use libc::pid_t;
use serde::Serialize;
use crate::data::{Connection, Observations};
use crate::error::Result;

pub const DEFAULT_WIDTH: usize = 79;

const TITLE:  &str  = "Connection summary:";
const PREFIX: usize = 25;
const LOCAL:  usize = 46;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    /// Append reverse-DNS names to remote addresses.
    pub alias: bool,
    /// Banner width; `None` uses the terminal width of stdout.
    pub width: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self { alias: true, width: None }
    }
}

/// Renders the observations of the tree rooted at `main` as text.
pub fn render(obs: &Observations, main: pid_t, opts: &Options) -> String {
    render_with(obs, main, opts, alias)
}

pub fn render_with<F>(obs: &Observations, main: pid_t, opts: &Options, resolve: F) -> String
where
    F: FnMut(IpAddr) -> Option<String>,
{
    let width   = opts.width.unwrap_or_else(term_width);
    let mut dns = Resolver::new(opts.alias, resolve);
    let mut out = String::new();

    let banner = "#".repeat(width);
    let _ = writeln!(out, "{}", banner);
    let _ = writeln!(out, "{}\n{}", TITLE, "-".repeat(TITLE.len()));

    for (pid, fds) in obs.iter() {
        let tag = if pid == main { " (main)" } else { "" };
        let _ = writeln!(out, "PID {}{}:", pid, tag);

        for conn in fds.values().flatten() {
            line(&mut out, conn, &mut dns);
        }
    }

    let _ = writeln!(out, "{}", banner);

    out
}

fn line<F>(out: &mut String, conn: &Connection, dns: &mut Resolver<F>)
where
    F: FnMut(IpAddr) -> Option<String>,
{
    let prefix = format!("{} - {}", conn.family, conn.status);
    let local  = address(conn.local);
    let remote = match conn.remote {
        Some(addr) => match dns.lookup(addr.ip()) {
            Some(name) => format!("{} (alias='{}')", address(Some(addr)), name),
            None       => address(Some(addr)),
        },
        None => address(None),
    };

    let _ = writeln!(
        out,
        "    * {:<prefix_width$}: {:>local_width$} -> {}",
        prefix,
        local,
        remote,
        prefix_width = PREFIX,
        local_width  = LOCAL,
    );
}

pub fn address(addr: Option<SocketAddr>) -> String {
    match addr {
        Some(SocketAddr::V4(a)) => format!("{}:{}", a.ip(), a.port()),
        Some(SocketAddr::V6(a)) => format!("[{}]:{}", a.ip(), a.port()),
        None                    => "unknown".to_owned(),
    }
}

#[derive(Serialize)]
struct Document<'a> {
    host:      String,
    pid:       pid_t,
    processes: &'a Observations,
}

/// Renders the observations as a JSON document.
pub fn render_json(obs: &Observations, main: pid_t) -> Result<String> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();

    let doc = Document { host, pid: main, processes: obs };
    let mut json = serde_json::to_string_pretty(&doc)?;
    json.push('\n');

    Ok(json)
}

struct Resolver<F> {
    enabled: bool,
    resolve: F,
    cache:   HashMap<IpAddr, Option<String>>,
}

impl<F: FnMut(IpAddr) -> Option<String>> Resolver<F> {
    fn new(enabled: bool, resolve: F) -> Self {
        Self { enabled, resolve, cache: HashMap::new() }
    }

    fn lookup(&mut self, ip: IpAddr) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let resolve = &mut self.resolve;
        self.cache.entry(ip).or_insert_with(|| resolve(ip)).clone()
    }
}

/// Reverse-DNS name of `ip`, or `None` if it has no name or lookup fails.
pub fn alias(ip: IpAddr) -> Option<String> {
    let addr = SocketAddr::new(ip, 0);
    let (host, _) = dns_lookup::getnameinfo(&addr, libc::NI_NAMEREQD).ok()?;
    Some(host)
}

/// Column count of the terminal attached to stdout, or the default width
/// when stdout is not a terminal.
pub fn term_width() -> usize {
    if !io::stdout().is_terminal() {
        return DEFAULT_WIDTH;
    }

    match terminal::size() {
        Ok((cols, _)) if cols > 0 => usize::from(cols),
        _                         => DEFAULT_WIDTH,
    }
}
