//! RTSP message codec (RFC 2326 §4, §6, §7).
//!
//! Bidirectional conversion between bytes and the RTSP message model: a
//! tagged union of [`Request`] and [`Response`], each carrying an ordered
//! list of raw `(name, value)` headers. [`normalize`] folds that list into
//! a case-insensitive lookup map without mutating the original list — the
//! wire encoding always serializes from the raw, ordered form.
//!
//! ## Grammar
//!
//! ```text
//! Request-Line:  Method SP Request-URI SP "RTSP/" major "." minor CRLF
//! Response-Line: "RTSP/" major "." minor SP status SP reason CRLF
//! Header:        token ":" *SP [ field-body ] CRLF
//! ```
//!
//! Header values may be line-folded on input (a continuation line begins
//! with a space or tab after CRLF); output never folds.

mod headers;
pub mod mkn;
mod request;
mod response;
pub mod transport;

pub use headers::{normalize, NormalizedHeaders, RawHeaders};
pub use mkn::MknOptions;
pub use request::Request;
pub use response::Response;

/// A parsed RTSP message: either a client [`Request`] or a server [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Parse a complete, CRLF-terminated RTSP message.
    ///
    /// Dispatches on the start line: `RTSP/<version>` introduces a
    /// response, anything else is parsed as a request.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        if raw.starts_with("RTSP/") {
            Response::parse(raw).map(Message::Response)
        } else {
            Request::parse(raw).map(Message::Request)
        }
    }

    pub fn serialize(&self) -> String {
        match self {
            Message::Request(r) => r.serialize(),
            Message::Response(r) => r.serialize(),
        }
    }
}

/// RTSP protocol version, always `RTSP/1.0` on the wire in this crate.
pub const RTSP_VERSION: (u8, u8) = (1, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_start_line() {
        let req = "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        assert!(matches!(Message::parse(req).unwrap(), Message::Request(_)));

        let resp = "RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n";
        assert!(matches!(Message::parse(resp).unwrap(), Message::Response(_)));
    }
}
