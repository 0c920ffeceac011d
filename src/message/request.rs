use crate::error::{Error, ParseErrorKind, Result};

use super::headers::{is_token_char, normalize, parse_header_block, NormalizedHeaders, RawHeaders};

/// A parsed RTSP request: `Method Request-URI RTSP/major.minor`, headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub version: (u8, u8),
    pub headers: RawHeaders,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: super::RTSP_VERSION,
            headers: RawHeaders::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive view of `self.headers`. Recomputed on each call —
    /// cheap relative to the I/O around it, and keeps the raw list as the
    /// single source of truth.
    pub fn normalized(&self) -> NormalizedHeaders {
        normalize(&self.headers)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.normalized().get(name).map(str::to_string)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq")?.trim().parse().ok()
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let line_end = raw.find("\r\n").ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: raw.len(),
        })?;
        let start_line = &raw[..line_end];

        let mut parts = start_line.splitn(3, ' ');
        let method = parts.next().filter(|s| !s.is_empty()).ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: 0,
        })?;
        let uri = parts.next().filter(|s| !s.is_empty()).ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: method.len() + 1,
        })?;
        let version_field = parts.next().ok_or(Error::Parse {
            kind: ParseErrorKind::MalformedStartLine,
            offset: method.len() + uri.len() + 2,
        })?;

        if !method.chars().all(is_token_char) {
            return Err(Error::Parse {
                kind: ParseErrorKind::MalformedStartLine,
                offset: 0,
            });
        }
        let version = parse_version(version_field, method.len() + uri.len() + 2)?;

        let (headers, _) = parse_header_block(&raw[line_end + 2..], line_end + 2)?;

        Ok(Request {
            method: method.to_string(),
            uri: uri.to_string(),
            version,
            headers,
        })
    }

    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{} {} RTSP/{}.{}\r\n",
            self.method, self.uri, self.version.0, self.version.1
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
    fn parses_options_star() {
        let req = Request::parse("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "*");
        assert_eq!(req.cseq(), Some(1));
    }

    #[test]
    fn missing_cseq_is_none_not_error() {
        let req = Request::parse("OPTIONS * RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.cseq(), None);
    }

    #[test]
    fn round_trips_through_serialize() {
        let req = Request::new("SETUP", "rtsp://h/f")
            .with_header("CSeq", "2")
            .with_header("Transport", "RTP/AVP;unicast;client_port=5000");
        let wire = req.serialize();
        let back = Request::parse(&wire).unwrap();
        assert_eq!(req.method, back.method);
        assert_eq!(req.uri, back.uri);
        assert_eq!(req.headers, back.headers);
    }

    #[test]
    fn rejects_missing_version() {
        assert!(Request::parse("OPTIONS *\r\n\r\n").is_err());
    }

    #[test]
    fn rejects_unterminated_message() {
        assert!(Request::parse("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n").is_err());
    }
}
