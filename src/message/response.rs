use crate::error::{Error, ParseErrorKind, Result};

use super::headers::{normalize, parse_header_block, NormalizedHeaders, RawHeaders};

/// A parsed RTSP response: `RTSP/major.minor status reason`, headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub version: (u8, u8),
    pub status: u16,
    pub reason: String,
    pub headers: RawHeaders,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            version: super::RTSP_VERSION,
            status,
            reason: reason.into(),
            headers: RawHeaders::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn normalized(&self) -> NormalizedHeaders {
        normalize(&self.headers)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.normalized().get(name).map(str::to_string)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let line_end = raw.find("\r\n").ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: raw.len(),
        })?;
        let start_line = &raw[..line_end];

        let mut parts = start_line.splitn(3, ' ');
        let version_field = parts.next().filter(|s| !s.is_empty()).ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: 0,
        })?;
        let status_field = parts.next().ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: version_field.len() + 1,
        })?;
        let reason = parts.next().unwrap_or("").to_string();

        let version = parse_version(version_field, 0)?;
        if status_field.len() != 3 || !status_field.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Parse {
                kind: ParseErrorKind::MalformedStartLine,
                offset: version_field.len() + 1,
            });
        }
        let status: u16 = status_field.parse().map_err(|_| Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: version_field.len() + 1,
        })?;

        let (headers, _) = parse_header_block(&raw[line_end + 2..], line_end + 2)?;

        Ok(Response {
            version,
            status,
            reason,
            headers,
        })
    }

    pub fn serialize(&self) -> String {
        let mut out = format!(
            "RTSP/{}.{} {} {}\r\n",
            self.version.0, self.version.1, self.status, self.reason
        );
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

fn parse_version(field: &str, offset: usize) -> Result<(u8, u8)> {
    let field = field.strip_prefix("RTSP/").ok_or(Error::Parse {
        kind: ParseErrorKind::MalformedStartLine,
        offset,
    })?;
    let (major, minor) = field.split_once('.').ok_or(Error::Parse {
        kind: ParseErrorKind::MalformedStartLine,
        offset,
    })?;
    let major: u8 = major.parse().map_err(|_| Error::Parse {
        kind: ParseErrorKind::MalformedStartLine,
        offset,
    })?;
    let minor: u8 = minor.parse().map_err(|_| Error::Parse {
        kind: ParseErrorKind::MalformedStartLine,
        offset,
    })?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_response() {
        let resp = Response::parse("RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert!(resp.is_success());
    }

    #[test]
    fn round_trips_through_serialize() {
        let resp = Response::new(459, "Aggregate Operation Not Allowed").with_header("CSeq", "1");
        let wire = resp.serialize();
        let back = Response::parse(&wire).unwrap();
        assert_eq!(resp, back);
    }

    #[test]
    fn rejects_non_numeric_status() {
        assert!(Response::parse("RTSP/1.0 abc Bad\r\n\r\n").is_err());
    }

    #[test]
    fn informational_is_distinguished_from_success() {
        let resp = Response::parse("RTSP/1.0 100 Continue\r\n\r\n").unwrap();
        assert!(resp.is_informational());
        assert!(!resp.is_success());
    }
}
