//! RTSP URL grammar (spec.md §6):
//! `("rtsp:"|"rtspu:") "//" (host|"["ipv6-literal"]") [":" port] "/" path`.

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 554;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspUrl {
    pub udp: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RtspUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix("rtspu://") {
            (true, rest)
        } else if let Some(rest) = raw.strip_prefix("rtsp://") {
            (false, rest)
        } else {
            return Err(Error::Resolve(format!("unsupported scheme in {raw:?}")));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(Error::Resolve(format!("missing host in {raw:?}")));
        }

        let (host, port_part) = if let Some(bracket_end) = authority.strip_prefix('[') {
            match bracket_end.find(']') {
                Some(end) => {
                    let host = &bracket_end[..end];
                    let rest = &bracket_end[end + 1..];
                    let port_part = rest.strip_prefix(':');
                    (host.to_string(), port_part)
                }
                None => return Err(Error::Resolve(format!("unterminated IPv6 literal in {raw:?}"))),
            }
        } else {
            match authority.rfind(':') {
                Some(idx) => (authority[..idx].to_string(), Some(&authority[idx + 1..])),
                None => (authority.to_string(), None),
            }
        };

        let port = match port_part {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Resolve(format!("invalid port {p:?} in {raw:?}")))?,
            None => DEFAULT_PORT,
        };

        Ok(RtspUrl {
            udp: scheme,
            host,
            port,
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_path() {
        let url = RtspUrl::parse("rtsp://cam.local:8554/stream.jpg").unwrap();
        assert_eq!(url.host, "cam.local");
        assert_eq!(url.port, 8554);
        assert_eq!(url.path, "/stream.jpg");
        assert!(!url.udp);
    }

    #[test]
    fn defaults_port_when_absent() {
        let url = RtspUrl::parse("rtsp://cam.local/stream.jpg").unwrap();
        assert_eq!(url.port, DEFAULT_PORT);
    }

    #[test]
    fn parses_ipv6_literal_host() {
        let url = RtspUrl::parse("rtsp://[::1]:554/a").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, 554);
    }

    #[test]
    fn recognizes_rtspu_scheme() {
        let url = RtspUrl::parse("rtspu://cam.local/a").unwrap();
        assert!(url.udp);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(RtspUrl::parse("http://cam.local/a").is_err());
    }
}
