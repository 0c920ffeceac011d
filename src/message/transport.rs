//! `Transport` header grammar (spec.md §4.1).
//!
//! ```text
//! transport-spec = transport-protocol "/" profile [ "/" lower-transport ] *( ";" parameter )
//! parameter      = ttl= | server_port= | client_port= | port= | ssrc= | mode= | token
//! port-or-range  = 1*5DIGIT [ "-" 1*5DIGIT ]
//! ```

use std::fmt;

use crate::error::{Error, ParseErrorKind, Result};

use super::headers::is_token_char;

/// Either a single port number or a `low-high` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortValue {
    Single(u32),
    Range(u32, u32),
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortValue::Single(p) => write!(f, "{p}"),
            PortValue::Range(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

/// One `Transport` parameter, in the order spec.md §4.1 commits on.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Ttl(u16),
    ServerPort(PortValue),
    ClientPort(PortValue),
    Port(PortValue),
    Ssrc(u32),
    Mode(String),
    Token(String),
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Ttl(v) => write!(f, "ttl={v}"),
            Parameter::ServerPort(v) => write!(f, "server_port={v}"),
            Parameter::ClientPort(v) => write!(f, "client_port={v}"),
            Parameter::Port(v) => write!(f, "port={v}"),
            Parameter::Ssrc(v) => write!(f, "ssrc={v:08x}"),
            Parameter::Mode(v) => write!(f, "mode=\"{v}\""),
            Parameter::Token(v) => write!(f, "{v}"),
        }
    }
}

/// One entry of a comma-separated `Transport` header value.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSpec {
    pub transport_protocol: String,
    pub profile: String,
    pub lower_transport: Option<String>,
    pub parameters: Vec<Parameter>,
}

impl TransportSpec {
    pub fn rtp_avp_udp_unicast() -> Self {
        TransportSpec {
            transport_protocol: "RTP".to_string(),
            profile: "AVP".to_string(),
            lower_transport: None,
            parameters: vec![Parameter::Token("unicast".to_string())],
        }
    }

    pub fn parameter_named(&self, f: impl Fn(&Parameter) -> bool) -> Option<&Parameter> {
        self.parameters.iter().find(|p| f(p))
    }

    pub fn client_port(&self) -> Option<PortValue> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::ClientPort(v) => Some(*v),
            _ => None,
        })
    }

    pub fn server_port(&self) -> Option<PortValue> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::ServerPort(v) => Some(*v),
            _ => None,
        })
    }

    pub fn ssrc(&self) -> Option<u32> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::Ssrc(v) => Some(*v),
            _ => None,
        })
    }

    pub fn is_unicast(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| matches!(p, Parameter::Token(t) if t.eq_ignore_ascii_case("unicast")))
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.transport_protocol, self.profile)?;
        if let Some(lt) = &self.lower_transport {
            write!(f, "/{lt}")?;
        }
        for p in &self.parameters {
            write!(f, ";{p}")?;
        }
        Ok(())
    }
}

/// Parse a full `Transport:` header value into its comma-separated specs.
pub fn parse(value: &str) -> Result<Vec<TransportSpec>> {
    let specs: Result<Vec<TransportSpec>> = value.split(',').map(|s| parse_spec(s.trim())).collect();
    let specs = specs?;
    if specs.is_empty() {
        return Err(Error::Parse {
            kind: ParseErrorKind::BadTransport,
            offset: 0,
        });
    }
    Ok(specs)
}

fn parse_spec(s: &str) -> Result<TransportSpec> {
    let bad = || Error::Parse {
        kind: ParseErrorKind::BadTransport,
        offset: 0,
    };

    let mut segments = s.split(';');
    let head = segments.next().ok_or_else(bad)?;
    let mut head_parts = head.split('/');
    let transport_protocol = head_parts.next().filter(|s| !s.is_empty()).ok_or_else(bad)?.to_string();
    let profile = head_parts.next().filter(|s| !s.is_empty()).ok_or_else(bad)?.to_string();
    let lower_transport = head_parts.next().map(str::to_string);
    if head_parts.next().is_some() {
        return Err(bad());
    }

    let mut parameters = Vec::new();
    for raw_param in segments {
        parameters.push(parse_parameter(raw_param)?);
    }

    Ok(TransportSpec {
        transport_protocol,
        profile,
        lower_transport,
        parameters,
    })
}

fn parse_parameter(raw: &str) -> Result<Parameter> {
    let bad = || Error::Parse {
        kind: ParseErrorKind::BadTransport,
        offset: 0,
    };

    if let Some(rest) = raw.strip_prefix("ttl=") {
        return rest.parse::<u16>().map(Parameter::Ttl).map_err(|_| bad());
    }
    if let Some(rest) = raw.strip_prefix("server_port=") {
        return parse_port_value(rest).map(Parameter::ServerPort);
    }
    if let Some(rest) = raw.strip_prefix("client_port=") {
        return parse_port_value(rest).map(Parameter::ClientPort);
    }
    if let Some(rest) = raw.strip_prefix("port=") {
        return parse_port_value(rest).map(Parameter::Port);
    }
    if let Some(rest) = raw.strip_prefix("ssrc=") {
        if rest.len() != 8 || !rest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(bad());
        }
        return u32::from_str_radix(rest, 16).map(Parameter::Ssrc).map_err(|_| bad());
    }
    if let Some(rest) = raw.strip_prefix("mode=") {
        let mode = if rest.starts_with('"') && rest.ends_with('"') && rest.len() >= 2 {
            rest[1..rest.len() - 1].to_string()
        } else {
            rest.to_string()
        };
        return Ok(Parameter::Mode(mode));
    }
    if !raw.is_empty() && raw.chars().all(is_token_char) {
        return Ok(Parameter::Token(raw.to_string()));
    }
    Err(bad())
}

fn parse_port_value(s: &str) -> Result<PortValue> {
    let bad = || Error::Parse {
        kind: ParseErrorKind::BadTransport,
        offset: 0,
    };
    match s.split_once('-') {
        Some((lo, hi)) => {
            let lo: u32 = lo.parse().map_err(|_| bad())?;
            let hi: u32 = hi.parse().map_err(|_| bad())?;
            Ok(PortValue::Range(lo, hi))
        }
        None => s.parse().map(PortValue::Single).map_err(|_| bad()),
    }
}
