use std::collections::btree_map::BTreeMap;
use std::collections::hash_map::{Entry, HashMap};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use libc::pid_t;
use serde::{Serialize, Serializer};

pub type Fd = i32;

pub type Fds = BTreeMap<Fd, BTreeSet<Connection>>;

/// One socket as seen by a single poll of the socket table. Two polls of
/// an unchanged socket produce equal values; a state change does not.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Connection {
    pub pid:    pid_t,
    pub fd:     Fd,
    pub family: Family,
    pub kind:   Kind,
    pub status: Status,
    pub local:  Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Family {
    #[serde(rename = "AF_INET")]
    Inet,
    #[serde(rename = "AF_INET6")]
    Inet6,
    #[serde(rename = "AF_UNIX")]
    Unix,
    #[serde(rename = "AF_UNSPEC")]
    Unknown,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Kind {
    #[serde(rename = "SOCK_STREAM")]
    Stream,
    #[serde(rename = "SOCK_DGRAM")]
    Datagram,
    #[serde(rename = "SOCK_SEQPACKET")]
    SeqPacket,
    #[serde(rename = "SOCK_RAW")]
    Raw,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Established,
    SynSent,
    SynRecv,
    #[serde(rename = "FIN_WAIT1")]
    FinWait1,
    #[serde(rename = "FIN_WAIT2")]
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    None,
}

/// Connections seen during an observation window, grouped by process and
/// descriptor. Processes keep the order in which they were first seen.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Observations {
    order: Vec<pid_t>,
    table: HashMap<pid_t, Fds>,
}

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `conn`, returning false if an identical entry was already present.
    pub fn insert(&mut self, conn: Connection) -> bool {
        let fds = match self.table.entry(conn.pid) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e)   => {
                self.order.push(conn.pid);
                e.insert(Fds::new())
            }
        };
        fds.entry(conn.fd).or_default().insert(conn)
    }

    pub fn get(&self, pid: pid_t) -> Option<&Fds> {
        self.table.get(&pid)
    }

    pub fn pids(&self) -> &[pid_t] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (pid_t, &Fds)> + '_ {
        self.order.iter().filter_map(move |pid| {
            self.table.get(pid).map(|fds| (*pid, fds))
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.iter().flat_map(|(_, fds)| fds.values().flatten())
    }

    pub fn len(&self) -> usize {
        self.connections().count()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Serialize for Observations {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(self.iter())
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Inet    => "AF_INET",
            Self::Inet6   => "AF_INET6",
            Self::Unix    => "AF_UNIX",
            Self::Unknown => "AF_UNSPEC",
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Stream    => "SOCK_STREAM",
            Self::Datagram  => "SOCK_DGRAM",
            Self::SeqPacket => "SOCK_SEQPACKET",
            Self::Raw       => "SOCK_RAW",
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Established => "ESTABLISHED",
            Self::SynSent     => "SYN_SENT",
            Self::SynRecv     => "SYN_RECV",
            Self::FinWait1    => "FIN_WAIT1",
            Self::FinWait2    => "FIN_WAIT2",
            Self::TimeWait    => "TIME_WAIT",
            Self::Close       => "CLOSE",
            Self::CloseWait   => "CLOSE_WAIT",
            Self::LastAck     => "LAST_ACK",
            Self::Listen      => "LISTEN",
            Self::Closing     => "CLOSING",
            Self::None        => "NONE",
        })
    }
}

#[cfg(test)]
pub(crate) fn tcp(pid: pid_t, fd: Fd, status: Status, local: &str, remote: &str) -> Connection {
    Connection {
        pid:    pid,
        fd:     fd,
        family: Family::Inet,
        kind:   Kind::Stream,
        status: status,
        local:  local.parse().ok(),
        remote: remote.parse().ok(),
    }
}
