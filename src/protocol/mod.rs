//! RTSP server-side method dispatch (spec.md §4.3).
//!
//! [`Dispatcher`] is the server state machine's public contract: given a
//! parsed request and the peer address it arrived from, produce a
//! response. It owns no transport — the connection layer
//! ([`crate::server`]) calls it once per parsed request and writes back
//! whatever it returns.

mod handler;

pub use handler::Dispatcher;
