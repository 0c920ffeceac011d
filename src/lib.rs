//! # mjrtsp — RTSP 1.0 control plane + Motion-JPEG RTP/FEC media path
//!
//! A streaming library combining an RTSP 1.0 control server and client
//! with an RTP payload path for a custom Motion-JPEG profile, plus an
//! XOR-parity forward-error-correction channel modeled on the RFC 2733
//! parity scheme.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Packet header format, sequence-number tracking (Appendix A.1) |
//! | [RFC 2733](https://tools.ietf.org/html/rfc2733) | RTP FEC | XOR-parity protection level layout and recovery |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  server::Server  /  client::Client        │
//! ├──────────────────────────────────────────┤
//! │  protocol::Dispatcher — method dispatch   │
//! │  session            — session registry   │
//! ├──────────────────────────────────────────┤
//! │  message  — RTSP codec, Transport grammar │
//! │  rtp      — JPEG/FEC RTP sender/receiver  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use mjrtsp::Server;
//!
//! let mut server = Server::new("0.0.0.0:554");
//! server.start().unwrap();
//! // ... server.stop() on shutdown
//! ```
//!
//! ## Crate layout
//!
//! - [`message`] — RTSP request/response codec, header normalization, the
//!   `Transport` header grammar, and the private `MKN-Options` grammar.
//! - [`protocol`] — Server-side method dispatch ([`protocol::Dispatcher`]).
//! - [`session`] — Server-side session registry and lifecycle state.
//! - [`server`] — [`Server`] orchestrator: TCP/UDP listeners, idle timeout.
//! - [`client`] — [`Client`] state machine: SETUP/PLAY/PAUSE/TEARDOWN.
//! - [`rtp`] — RTP JPEG/FEC packet codec, sequence tracking, sender, receiver.
//! - [`url`] — RTSP URL grammar.
//! - [`resource`] — Resource-root file resolution for SETUP.
//! - [`error`] — [`Error`] enum and [`Result`] alias.

pub mod client;
pub mod error;
pub mod message;
pub mod protocol;
pub mod resource;
pub mod rtp;
pub mod server;
pub mod session;
pub mod url;

pub use client::{Client, ClientConfig, ClientState};
pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
