//! Per-connection TCP read loop (spec.md §4.4).
//!
//! Mirrors the teacher's `transport::tcp::accept_loop`/`Connection`: a
//! thread per accepted connection, reading terminator-delimited requests
//! with `BufReader::read_line` and writing the dispatcher's response back.
//! The idle timeout (spec.md §5) is implemented as a read timeout on the
//! socket itself — a header read that doesn't complete within the
//! configured window is treated as the idle timer firing, which purges
//! the peer's sessions and drops the connection.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::message::Request;
use crate::protocol::Dispatcher;

pub fn spawn_accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        listener.set_nonblocking(true).ok();
        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    if stream.set_nonblocking(false).is_err() {
                        continue;
                    }
                    let d = dispatcher.clone();
                    let r = running.clone();
                    thread::spawn(move || handle_connection(stream, d, idle_timeout, r));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "TCP accept error");
                    }
                }
            }
        }
        tracing::debug!("TCP accept loop exited");
    })
}

fn handle_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>, idle_timeout: Duration, running: Arc<AtomicBool>) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    if stream.set_read_timeout(Some(idle_timeout)).is_err() {
        return;
    }
    tracing::info!(%peer, "client connected");

    let reason = run(stream, &dispatcher, peer, &running);
    let purged = dispatcher.registry().purge(peer);
    tracing::info!(%peer, reason, purged, "client disconnected");
}

/// Returns the reason the connection loop exited, for logging.
fn run(stream: TcpStream, dispatcher: &Dispatcher, peer: SocketAddr, running: &AtomicBool) -> &'static str {
    let writer = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return "could not clone stream",
    };
    let mut writer = writer;
    let mut reader = BufReader::new(stream);

    while running.load(Ordering::SeqCst) {
        let mut request_text = String::new();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => return "connection closed by client",
                Ok(_) => {
                    request_text.push_str(&line);
                    if line == "\r\n" || line == "\n" {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    return "idle timeout";
                }
                Err(_) => return "read error",
            }
        }

        if request_text.trim().is_empty() {
            continue;
        }

        match Request::parse(&request_text) {
            Ok(request) => {
                tracing::debug!(%peer, method = %request.method, uri = %request.uri, "request");
                let response = dispatcher.handle(&request, peer);
                tracing::debug!(%peer, status = response.status, "response");
                if writer.write_all(response.serialize().as_bytes()).is_err() {
                    return "write error";
                }
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "malformed request, keeping connection open");
                let response = crate::message::Response::new(400, format!("Bad Request: {e}"));
                if writer.write_all(response.serialize().as_bytes()).is_err() {
                    return "write error";
                }
            }
        }
    }

    "server shutting down"
}
