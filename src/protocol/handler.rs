//! The server state machine's method dispatch (spec.md §4.3).

use std::fs::File;
use std::net::{SocketAddr, UdpSocket};

use rand::Rng;

use crate::error::Error;
use crate::message::mkn::{self, MknOptions};
use crate::message::transport::{self, Parameter, PortValue, TransportSpec};
use crate::message::{Request, Response};
use crate::resource;
use crate::rtp::{RtpSender, SenderOptions};
use crate::server::ServerConfig;
use crate::session::{SessionHandle, SessionRegistry, SessionState};

/// Lowest and highest client/server port this server will hand out when the
/// peer doesn't request a specific one (spec.md §4.3).
const EPHEMERAL_PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65525;

/// Dispatches parsed RTSP requests to method handlers and owns the session
/// registry they mutate. One `Dispatcher` is shared (via `Arc`) across every
/// connection the transport layer accepts.
pub struct Dispatcher {
    registry: SessionRegistry,
    config: ServerConfig,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, config: ServerConfig) -> Self {
        Dispatcher { registry, config }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handle one parsed request from `peer`, producing the response to
    /// write back. Implements the guard chain of spec.md §4.3 in order.
    pub fn handle(&self, request: &Request, peer: SocketAddr) -> Response {
        let method = request.method.as_str();
        let cseq = match request.cseq() {
            Some(c) => c.to_string(),
            None => return Response::new(400, "Bad Request: CSeq missing"),
        };

        match method {
            "OPTIONS" => Response::new(200, "OK")
                .with_header("CSeq", &cseq)
                .with_header("Public", "SETUP, TEARDOWN, PLAY, PAUSE"),

            "DESCRIBE" => Response::new(501, "not implemented").with_header("CSeq", &cseq),

            "GET_PARAMETER" => self.handle_get_parameter(request, &cseq),

            "SETUP" if request.header("Session").is_some() => {
                Response::new(459, "Aggregate Operation Not Allowed").with_header("CSeq", &cseq)
            }

            "SETUP" => {
                let session = self.registry.create(peer);
                self.handle_setup(&session, request, peer, &cseq)
            }

            _ if request.header("Session").is_none() => {
                Response::new(400, "Session header not found").with_header("CSeq", &cseq)
            }

            _ => {
                let identifier = session_id_from_header(&request.header("Session").unwrap());
                let session = match self.registry.find(&identifier) {
                    Ok(s) => s,
                    Err(_) => return Response::new(454, "Session not found").with_header("CSeq", &cseq),
                };
                self.registry.touch(&identifier, peer);

                let response = match method {
                    "PLAY" => self.handle_play(&session, &cseq),
                    "PAUSE" => self.handle_pause(&session, &cseq),
                    "TEARDOWN" => self.handle_teardown(&session, &cseq),
                    other => Response::new(501, format!("\"{other}\" not implemented")).with_header("CSeq", &cseq),
                };

                if method == "TEARDOWN" {
                    self.registry.delete(&identifier);
                }
                response
            }
        }
    }

    /// Spec.md §11: stateless keepalive, echoes `Session` when valid.
    fn handle_get_parameter(&self, request: &Request, cseq: &str) -> Response {
        let mut response = Response::new(200, "OK").with_header("CSeq", cseq);
        if let Some(header) = request.header("Session") {
            let identifier = session_id_from_header(&header);
            if self.registry.find(&identifier).is_ok() {
                response = response.with_header("Session", identifier);
            }
        }
        response
    }

    fn handle_setup(&self, session: &SessionHandle, request: &Request, peer: SocketAddr, cseq: &str) -> Response {
        {
            let guard = session.lock();
            if !matches!(guard.state, SessionState::Init) {
                return Response::new(455, "Method Not Valid In This State").with_header("CSeq", cseq);
            }
        }

        if let Some(require) = request.header("Require") {
            let offending: Vec<String> = require
                .split(',')
                .map(str::trim)
                .filter(|tag| *tag != mkn::OPTION_TAG)
                .map(str::to_string)
                .collect();
            if !offending.is_empty() {
                let mut response = Response::new(551, "Option not supported").with_header("CSeq", cseq);
                for tag in offending {
                    response = response.with_header("Unsupported", tag);
                }
                return response;
            }
        }

        let wants_mkn_options = request
            .header("Require")
            .map(|r| r.split(',').any(|tag| tag.trim() == mkn::OPTION_TAG))
            .unwrap_or(false);
        let mkn_options = if wants_mkn_options {
            match request.header(mkn::HEADER_NAME) {
                Some(value) => match MknOptions::parse(&value) {
                    Ok(opts) => Some(opts),
                    Err(_) => return Response::new(400, "Bad Request: malformed MKN-Options").with_header("CSeq", cseq),
                },
                None => return Response::new(400, "Bad Request: MKN-Options missing").with_header("CSeq", cseq),
            }
        } else {
            None
        };

        let Some(transport_header) = request.header("Transport") else {
            return Response::new(400, "Bad Request: Transport missing").with_header("CSeq", cseq);
        };
        let specs = match transport::parse(&transport_header) {
            Ok(specs) => specs,
            Err(_) => return Response::new(461, "Unsupported Transport").with_header("CSeq", cseq),
        };
        let Some(chosen) = specs.iter().find(|spec| is_acceptable_unicast_udp(spec)) else {
            return Response::new(461, "Unsupported Transport").with_header("CSeq", cseq);
        };

        let file_path = match resource::resolve(&self.config.resource_root, &request.uri) {
            Ok(path) => path,
            Err(Error::PathEscape(_)) | Err(Error::ResourceNotFound(_)) => {
                return Response::new(404, "Not Found").with_header("CSeq", cseq);
            }
            Err(_) => return Response::new(500, "Internal Server Error").with_header("CSeq", cseq),
        };
        let file = match File::open(&file_path) {
            Ok(f) => f,
            Err(_) => return Response::new(404, "Not Found").with_header("CSeq", cseq),
        };

        let mut rng = rand::rng();
        let client_port = match chosen.client_port() {
            Some(PortValue::Single(p)) => p as u16,
            Some(PortValue::Range(lo, _)) => lo as u16,
            None => rng.random_range(EPHEMERAL_PORT_RANGE),
        };
        let server_port = client_port.wrapping_add(2);
        let ssrc = match chosen.ssrc() {
            Some(s) if s != 0 => s,
            _ => rng.random(),
        };

        let socket = match UdpSocket::bind(("0.0.0.0", server_port)) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, server_port, "failed to bind RTP send socket");
                return Response::new(500, "Internal Server Error").with_header("CSeq", cseq);
            }
        };

        let sender_options = SenderOptions {
            bernoulli_drop_p: mkn_options.map(|o| o.bernoulli_p),
            fec_k: mkn_options.map(|o| o.fec_k),
        };
        let dest = SocketAddr::new(peer.ip(), client_port);
        let sender = RtpSender::spawn(socket, dest, ssrc, file, sender_options);

        let (identifier, session_header) = {
            let mut guard = session.lock();
            guard.last_seen = peer;
            guard.sender = Some(sender);
            guard.state = SessionState::Ready;
            (guard.identifier.clone(), guard.header_value())
        };
        tracing::info!(session_id = %identifier, %peer, client_port, server_port, ssrc, "SETUP complete");

        let response_spec = TransportSpec {
            transport_protocol: "RTP".to_string(),
            profile: "AVP".to_string(),
            lower_transport: Some("UDP".to_string()),
            parameters: vec![
                Parameter::Token("unicast".to_string()),
                Parameter::ClientPort(PortValue::Single(client_port as u32)),
                Parameter::ServerPort(PortValue::Single(server_port as u32)),
                Parameter::Ssrc(ssrc),
            ],
        };

        Response::new(200, "OK")
            .with_header("CSeq", cseq)
            .with_header("Session", session_header)
            .with_header("Transport", response_spec.to_string())
    }

    fn handle_play(&self, session: &SessionHandle, cseq: &str) -> Response {
        let mut guard = session.lock();
        match guard.state {
            SessionState::Ready => {
                if let Some(sender) = &guard.sender {
                    sender.start();
                }
                guard.state = SessionState::Playing;
                Response::new(200, "OK").with_header("CSeq", cseq).with_header("Session", guard.header_value())
            }
            SessionState::Playing => {
                Response::new(200, "OK").with_header("CSeq", cseq).with_header("Session", guard.header_value())
            }
            _ => Response::new(455, "Method Not Valid In This State").with_header("CSeq", cseq),
        }
    }

    fn handle_pause(&self, session: &SessionHandle, cseq: &str) -> Response {
        let mut guard = session.lock();
        if !matches!(guard.state, SessionState::Playing) {
            return Response::new(455, "Method Not Valid In This State").with_header("CSeq", cseq);
        }
        if let Some(sender) = &guard.sender {
            sender.stop();
        }
        guard.state = SessionState::Ready;
        Response::new(200, "OK").with_header("CSeq", cseq).with_header("Session", guard.header_value())
    }

    fn handle_teardown(&self, session: &SessionHandle, cseq: &str) -> Response {
        let mut guard = session.lock();
        if let Some(sender) = guard.sender.take() {
            sender.stop();
        }
        Response::new(200, "OK").with_header("CSeq", cseq)
    }
}

/// First parameter must be the `unicast` token; `RTP/AVP` with lower
/// transport absent or `UDP` is acceptable (spec.md §4.3).
fn is_acceptable_unicast_udp(spec: &TransportSpec) -> bool {
    let profile_ok = spec.transport_protocol.eq_ignore_ascii_case("RTP") && spec.profile.eq_ignore_ascii_case("AVP");
    let lower_ok = spec
        .lower_transport
        .as_deref()
        .map(|t| t.eq_ignore_ascii_case("UDP"))
        .unwrap_or(true);
    let unicast_first = matches!(
        spec.parameters.first(),
        Some(Parameter::Token(t)) if t.eq_ignore_ascii_case("unicast")
    );
    profile_ok && lower_ok && unicast_first
}

/// `Session` headers may carry a `;timeout=` suffix (spec.md §11); the
/// identifier is whatever precedes the first `;`.
fn session_id_from_header(raw: &str) -> String {
    raw.split(';').next().unwrap_or(raw).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn scratch_dir(tag: &str) -> ScratchDir {
        let dir = std::env::temp_dir().join(format!(
            "mjrtsp-handler-test-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        ScratchDir(dir)
    }

    fn dispatcher(tag: &str) -> (Dispatcher, ScratchDir) {
        let dir = scratch_dir(tag);
        let config = ServerConfig {
            resource_root: dir.0.clone(),
            ..ServerConfig::default()
        };
        (Dispatcher::new(SessionRegistry::new(), config), dir)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn options_echoes_cseq_and_lists_public_methods() {
        let (d, _dir) = dispatcher("options");
        let req = Request::parse("OPTIONS * RTSP/1.0\r\nCSeq: 0\r\n\r\n").unwrap();
        let resp = d.handle(&req, peer());
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("CSeq").as_deref(), Some("0"));
        assert_eq!(resp.header("Public").as_deref(), Some("SETUP, TEARDOWN, PLAY, PAUSE"));
    }

    #[test]
    fn missing_cseq_is_bad_request() {
        let (d, _dir) = dispatcher("missing-cseq");
        let req = Request::parse("OPTIONS * RTSP/1.0\r\n\r\n").unwrap();
        let resp = d.handle(&req, peer());
        assert_eq!(resp.status, 400);
        assert!(resp.reason.starts_with("Bad Request: CSeq missing"));
    }

    #[test]
    fn setup_with_session_header_is_aggregate_rejected() {
        let (d, _dir) = dispatcher("aggregate");
        let req = Request::parse(
            "SETUP rtsp://h/f RTSP/1.0\r\nCSeq: 1\r\nSession: foo\r\nTransport: RTP/AVP;unicast;client_port=5000\r\n\r\n",
        )
        .unwrap();
        let resp = d.handle(&req, peer());
        assert_eq!(resp.status, 459);
    }

    #[test]
    fn setup_of_missing_file_is_404() {
        let (d, _dir) = dispatcher("missing-file");
        let req = Request::parse(
            "SETUP rtsp://h/does-not-exist RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=5000\r\n\r\n",
        )
        .unwrap();
        let resp = d.handle(&req, peer());
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn unknown_method_names_itself_in_reason() {
        let (d, _dir) = dispatcher("unknown-method");
        let req = Request::parse("FROB * RTSP/1.0\r\nCSeq: 7\r\nSession: x\r\n\r\n").unwrap();
        let resp = d.handle(&req, peer());
        assert_eq!(resp.status, 454); // unknown session first, per guard ordering

        let req = Request::parse("FROB * RTSP/1.0\r\nCSeq: 7\r\n\r\n").unwrap();
        let resp = d.handle(&req, peer());
        assert_eq!(resp.status, 400); // no Session header at all
    }

    #[test]
    fn full_setup_play_pause_teardown_cycle() {
        let (d, dir) = dispatcher("full-cycle");
        let mut f = std::fs::File::create(dir.path().join("clip.mjpg")).unwrap();
        f.write_all(b"00003abc").unwrap();

        let setup = Request::parse(
            "SETUP rtsp://h/clip.mjpg RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=50000\r\n\r\n",
        )
        .unwrap();
        let resp = d.handle(&setup, peer());
        assert_eq!(resp.status, 200);
        let session_id = resp.header("Session").unwrap();
        let session_id = session_id_from_header(&session_id);

        let play = Request::parse(&format!("PLAY * RTSP/1.0\r\nCSeq: 2\r\nSession: {session_id}\r\n\r\n")).unwrap();
        assert_eq!(d.handle(&play, peer()).status, 200);

        let pause = Request::parse(&format!("PAUSE * RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n\r\n")).unwrap();
        assert_eq!(d.handle(&pause, peer()).status, 200);

        let teardown =
            Request::parse(&format!("TEARDOWN * RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n")).unwrap();
        assert_eq!(d.handle(&teardown, peer()).status, 200);
        assert!(d.registry().find(&session_id).is_err());
    }
}
