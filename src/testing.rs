//! Helpers for exercising the tracker against real sockets.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, trace};
use parking_lot::Mutex;

/// A loopback TCP server that echoes back whatever its clients send.
/// The server stops when dropped.
pub struct EchoServer {
    addr:   SocketAddr,
    stop:   Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EchoServer {
    pub fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;

        let addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = thread::Builder::new()
            .name("echo-server".to_owned())
            .spawn(move || serve(listener, flag))?;

        debug!("echo server on {}", addr);

        Ok(Self { addr, stop, handle: Some(handle) })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(listener: TcpListener, stop: Arc<AtomicBool>) {
    let mut clients = Vec::new();

    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                trace!("echo client {}", peer);
                if stream.set_nonblocking(true).is_ok() {
                    clients.push(stream);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => (),
            Err(_) => break,
        }

        clients.retain_mut(echo);
        thread::sleep(Duration::from_millis(1));
    }

    for client in clients {
        let _ = client.shutdown(Shutdown::Both);
    }
}

// Returns false once the client has gone away.
fn echo(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1024];
    match stream.read(&mut buf) {
        Ok(0)  => false,
        Ok(n)  => stream.write_all(&buf[..n]).is_ok(),
        Err(e) => e.kind() == io::ErrorKind::WouldBlock,
    }
}

/// Connects to `addr` and sends `msg` `count` times, reading each echo.
pub fn send(addr: SocketAddr, msg: &[u8], count: usize) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let mut buf = vec![0u8; msg.len()];
    for _ in 0..count {
        stream.write_all(msg)?;
        stream.read_exact(&mut buf)?;
    }

    Ok(())
}

/// A cloneable in-memory writer, for capturing reports.
#[derive(Clone, Debug, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
