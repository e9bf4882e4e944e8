use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use libc::pid_t;
use log::trace;
use procfs::ProcError;
use procfs::net::{TcpNetEntry, TcpState, UdpNetEntry, UnixNetEntry};
use procfs::process::{all_processes, FDTarget, Process};
use crate::data::{Connection, Family, Kind, Status};
use super::{Probe, ProbeError, Socket};

/// Reads process and socket state from `/proc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Procfs;

impl Probe for Procfs {
    fn exists(&self, pid: pid_t) -> bool {
        Process::new(pid).and_then(|p| p.stat()).is_ok()
    }

    fn descendants(&self, pid: pid_t) -> Result<Vec<pid_t>, ProbeError> {
        if !self.exists(pid) {
            return Err(ProbeError::NoSuchProcess(pid));
        }

        let mut parents = HashMap::<pid_t, Vec<pid_t>>::new();
        for process in all_processes()? {
            if let Ok(stat) = process.and_then(|p| p.stat()) {
                parents.entry(stat.ppid).or_default().push(stat.pid);
            }
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::from(vec![pid]);

        while let Some(next) = queue.pop_front() {
            for &child in parents.get(&next).into_iter().flatten() {
                found.push(child);
                queue.push_back(child);
            }
        }

        Ok(found)
    }

    fn sockets(&self) -> Result<Vec<Socket>, ProbeError> {
        let mut table = HashMap::<u64, Connection>::new();

        for e in table_or_empty(procfs::net::tcp())? {
            table.insert(e.inode, tcp(&e, Family::Inet));
        }
        for e in table_or_empty(procfs::net::tcp6())? {
            table.insert(e.inode, tcp(&e, Family::Inet6));
        }
        for e in table_or_empty(procfs::net::udp())? {
            table.insert(e.inode, udp(&e, Family::Inet));
        }
        for e in table_or_empty(procfs::net::udp6())? {
            table.insert(e.inode, udp(&e, Family::Inet6));
        }
        for e in table_or_empty(procfs::net::unix())? {
            table.insert(e.inode, unix(&e));
        }

        let mut sockets = Vec::with_capacity(table.len());

        for process in all_processes()? {
            let process = match process {
                Ok(process) => process,
                Err(_)      => continue,
            };

            let fds = match process.fd() {
                Ok(fds) => fds,
                Err(e)  => {
                    trace!("skipping fds of {}: {}", process.pid, e);
                    continue;
                }
            };

            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    if let Some(conn) = table.get(&inode) {
                        let mut conn = conn.clone();
                        conn.pid = process.pid;
                        conn.fd  = fd.fd;
                        sockets.push(Socket::owned(conn));
                    }
                }
            }
        }

        Ok(sockets)
    }
}

impl From<ProcError> for ProbeError {
    fn from(err: ProcError) -> Self {
        match err {
            ProcError::PermissionDenied(path) => {
                Self::PermissionDenied(format!("{:?}", path))
            }
            err => Self::Other(err.to_string()),
        }
    }
}

// Tables for disabled protocols (e.g. no IPv6) are missing entirely.
fn table_or_empty<T>(table: procfs::ProcResult<Vec<T>>) -> Result<Vec<T>, ProbeError> {
    match table {
        Ok(entries)                 => Ok(entries),
        Err(ProcError::NotFound(_)) => Ok(Vec::new()),
        Err(e)                      => Err(e.into()),
    }
}

fn tcp(e: &TcpNetEntry, family: Family) -> Connection {
    Connection {
        pid:    -1,
        fd:     -1,
        family: family,
        kind:   Kind::Stream,
        status: status(&e.state),
        local:  addr(e.local_address),
        remote: addr(e.remote_address),
    }
}

fn udp(e: &UdpNetEntry, family: Family) -> Connection {
    Connection {
        pid:    -1,
        fd:     -1,
        family: family,
        kind:   Kind::Datagram,
        status: Status::None,
        local:  addr(e.local_address),
        remote: addr(e.remote_address),
    }
}

fn unix(e: &UnixNetEntry) -> Connection {
    let kind = match e.socket_type as i32 {
        libc::SOCK_STREAM    => Kind::Stream,
        libc::SOCK_DGRAM     => Kind::Datagram,
        libc::SOCK_SEQPACKET => Kind::SeqPacket,
        _                    => Kind::Raw,
    };

    Connection {
        pid:    -1,
        fd:     -1,
        family: Family::Unix,
        kind:   kind,
        status: Status::None,
        local:  None,
        remote: None,
    }
}

fn status(state: &TcpState) -> Status {
    match state {
        TcpState::Established => Status::Established,
        TcpState::SynSent     => Status::SynSent,
        TcpState::SynRecv     => Status::SynRecv,
        TcpState::FinWait1    => Status::FinWait1,
        TcpState::FinWait2    => Status::FinWait2,
        TcpState::TimeWait    => Status::TimeWait,
        TcpState::Close       => Status::Close,
        TcpState::CloseWait   => Status::CloseWait,
        TcpState::LastAck     => Status::LastAck,
        TcpState::Listen      => Status::Listen,
        TcpState::Closing     => Status::Closing,
        #[allow(unreachable_patterns)]
        _                     => Status::SynRecv,
    }
}

// Port zero means the socket is not bound or not connected on that side.
fn addr(addr: SocketAddr) -> Option<SocketAddr> {
    match addr.port() {
        0 => None,
        _ => Some(addr),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::process::Command;
    use super::*;

    #[test]
    fn current_process_exists() {
        let pid = std::process::id() as pid_t;
        assert!(Procfs.exists(pid));
        assert!(!Procfs.exists(pid_t::MAX));
    }

    #[test]
    fn missing_root_has_no_descendants() {
        match Procfs.descendants(pid_t::MAX) {
            Err(ProbeError::NoSuchProcess(pid)) => assert_eq!(pid, pid_t::MAX),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn finds_spawned_child() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let me  = std::process::id() as pid_t;
        let pid = child.id() as pid_t;

        let found = Procfs.descendants(me).unwrap();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(found.contains(&pid), "{} not in {:?}", pid, found);
    }

    #[test]
    fn sees_own_loopback_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port     = listener.local_addr().unwrap().port();
        let _client  = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let _server  = listener.accept().unwrap();

        let me      = std::process::id() as pid_t;
        let sockets = Procfs.sockets().unwrap();
        let ours    = sockets.iter().filter(|s| s.pid == Some(me)).collect::<Vec<_>>();

        assert!(ours.iter().any(|s| {
            s.conn.status == Status::Listen && s.conn.local.map(|a| a.port()) == Some(port)
        }));
        assert!(ours.iter().any(|s| {
            s.conn.status == Status::Established && s.conn.remote.map(|a| a.port()) == Some(port)
        }));
        assert!(ours.iter().all(|s| s.conn.fd >= 0));
    }

    #[test]
    fn permission_errors_stay_distinguishable() {
        let denied = ProbeError::from(ProcError::PermissionDenied(None));
        assert!(matches!(denied, ProbeError::PermissionDenied(_)));

        let missing = ProbeError::from(ProcError::NotFound(None));
        assert!(matches!(missing, ProbeError::Other(_)));

        let other = ProbeError::from(ProcError::Other("bad table".to_owned()));
        match other {
            ProbeError::Other(msg) => assert!(msg.contains("bad table"), "{}", msg),
            e                      => panic!("unexpected: {:?}", e),
        }
    }

    #[test]
    fn unbound_side_is_absent() {
        assert_eq!(addr("0.0.0.0:0".parse().unwrap()), None);
        assert!(addr("[::1]:22".parse().unwrap()).is_some());
    }
}
