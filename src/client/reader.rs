//! Background reader thread for [`super::Client`] (spec.md §4.4).
//!
//! Mirrors the server's terminator-delimited read loop
//! (`crate::server::tcp`), but the parsed messages are responses: each one
//! is correlated by its `CSeq` header against the outstanding-requests map
//! and handed to the waiting caller via a one-shot channel. 1xx responses
//! are logged and ignored — the matching request stays registered until a
//! final response arrives (spec.md §4.4).

use std::io::BufRead;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::message::Response;

use super::{LogCallback, Pending};

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub fn spawn(
    stream: TcpStream,
    pending: Arc<Pending>,
    log_handler: LogCallback,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || run(stream, pending, log_handler, shutdown))
}

fn run(stream: TcpStream, pending: Arc<Pending>, log_handler: LogCallback, shutdown: Arc<AtomicBool>) {
    stream.set_read_timeout(Some(POLL_TIMEOUT)).ok();
    let mut reader = std::io::BufReader::new(stream);

    while !shutdown.load(Ordering::SeqCst) {
        let mut response_text = String::new();
        let mut saw_any = false;
        let reason = loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break Some("connection closed by server"),
                Ok(_) => {
                    saw_any = true;
                    response_text.push_str(&line);
                    if line == "\r\n" || line == "\n" {
                        break None;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    if saw_any {
                        continue;
                    }
                    break None;
                }
                Err(_) => break Some("read error"),
            }
        };

        if let Some(reason) = reason {
            log_handler(&format!("client reader exiting: {reason}"));
            return;
        }
        if response_text.trim().is_empty() {
            continue;
        }

        match Response::parse(&response_text) {
            Ok(response) => dispatch(&pending, response, &log_handler),
            Err(e) => log_handler(&format!("malformed response from server: {e}")),
        }
    }
}

fn dispatch(pending: &Pending, response: Response, log_handler: &LogCallback) {
    if response.is_informational() {
        log_handler(&format!("<- {} {} (informational, ignored)", response.status, response.reason));
        return;
    }

    let Some(cseq) = response.header("CSeq").and_then(|v| v.trim().parse::<u32>().ok()) else {
        log_handler("response with missing or unparseable CSeq, dropping");
        return;
    };

    let sender = pending.waiting.lock().remove(&cseq);
    match sender {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => log_handler(&format!("response for unknown CSeq {cseq}, dropping")),
    }
}
