//! UDP datagram RTSP request path (spec.md §4.4).
//!
//! Each socket's reads are serialized by its own thread (the "strand" of
//! spec.md §5); handling each datagram — parsing and dispatching — is
//! farmed out to a worker thread so a slow handler can't stall the next
//! `recv_from`.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::message::Request;
use crate::protocol::Dispatcher;

pub fn spawn_datagram_loop(socket: UdpSocket, dispatcher: Arc<Dispatcher>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        socket.set_read_timeout(Some(Duration::from_millis(200))).ok();
        let socket = Arc::new(socket);
        let mut buf = [0u8; 65535];
        while running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, source)) => {
                    let datagram = buf[..n].to_vec();
                    let socket = socket.clone();
                    let dispatcher = dispatcher.clone();
                    thread::spawn(move || handle_datagram(&socket, &dispatcher, &datagram, source));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => tracing::warn!(error = %e, "UDP datagram read error"),
            }
        }
        tracing::debug!("UDP datagram loop exited");
    })
}

fn handle_datagram(socket: &UdpSocket, dispatcher: &Dispatcher, datagram: &[u8], source: std::net::SocketAddr) {
    let text = match std::str::from_utf8(datagram) {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!(%source, "UDP datagram was not valid UTF-8, dropping");
            return;
        }
    };
    let response = match Request::parse(text) {
        Ok(request) => dispatcher.handle(&request, source),
        Err(e) => crate::message::Response::new(400, format!("Bad Request: {e}")),
    };
    if let Err(e) = socket.send_to(response.serialize().as_bytes(), source) {
        tracing::warn!(%source, error = %e, "UDP response send failed");
    }
}
