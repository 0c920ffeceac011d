//! RTSP client state machine (spec.md §4.5).
//!
//! Mirrors the server's states {INIT, READY, PLAYING}. Unlike the
//! connection layer's accept loop, a [`Client`] owns a single TCP socket
//! connected at construction time, with a background thread reading
//! CRLF-terminated responses and handing each to the pending request it
//! answers, correlated by `CSeq` (spec.md §4.4).
//!
//! Each public operation here sends its request and blocks the calling
//! thread until the matching response arrives, rather than dispatching
//! through a callback on a reactor: the thread-based connection model used
//! throughout this crate has no executor to post onto, so a synchronous
//! round trip from the caller's thread is the direct reading of "work
//! dispatched onto the client's executor" once that executor is a plain
//! blocking socket. Frame delivery stays asynchronous regardless — it
//! rides the RTP receiver's own background threads, started once SETUP
//! succeeds.

mod reader;

use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Error, Result};
use crate::message::mkn::{self, MknOptions};
use crate::message::transport::{self, Parameter, PortValue, TransportSpec};
use crate::message::{Request, Response};
use crate::rtp::{RtpReceiver, Stats};
use crate::url::RtspUrl;

/// Client-side session state (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Ready,
    Playing,
}

/// The private `net.markusklemm.options` negotiation knob (spec.md §4.5).
/// Disabled by default: `setup()` emits no `Require`/`MKN-Options` headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientConfig {
    pub mkn_enabled: bool,
    pub bernoulli_p: f64,
    pub fec_k: u16,
    pub fec_p: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            mkn_enabled: false,
            bernoulli_p: 0.0,
            fec_k: 0,
            fec_p: 0,
        }
    }
}

/// How long `send_request` waits for a CSeq-matched response before giving up.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Lowest and highest client port this client offers in SETUP (spec.md §4.5).
const CLIENT_PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65525;

type FrameCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync + 'static>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync + 'static>;
pub(crate) type LogCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;
type StatsCallback = Arc<dyn Fn(Stats) + Send + Sync + 'static>;

/// Outstanding-requests map keyed by CSeq, shared with the reader thread.
pub(crate) struct Pending {
    next_cseq: AtomicU32,
    pub(crate) waiting: Mutex<HashMap<u32, mpsc::Sender<Response>>>,
}

/// An RTSP 1.0 client bound to one URL and one TCP connection.
///
/// Construct with [`Client::connect`], drive with `setup`/`play`/`pause`/
/// `teardown`, and drop when done — the destructor closes the socket and
/// joins the reader thread.
pub struct Client {
    url: RtspUrl,
    writer: Mutex<TcpStream>,
    pending: Arc<Pending>,
    state: Mutex<ClientState>,
    session_id: Mutex<Option<String>>,
    config: Mutex<ClientConfig>,
    frame_handler: FrameCallback,
    error_handler: ErrorCallback,
    log_handler: LogCallback,
    stats_handler: Mutex<Option<StatsCallback>>,
    receiver: Mutex<Option<RtpReceiver>>,
    reader_shutdown: Arc<AtomicBool>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Resolve `url`, connect, and start the background reader. `frame_handler`
    /// is called from the RTP receiver's own thread once SETUP succeeds;
    /// `error_handler` receives runtime errors (network or server, or a
    /// method invoked in a state that forbids it); `log_handler` gets
    /// diagnostic traffic (spec.md §4.5).
    pub fn connect(
        url: &str,
        frame_handler: impl Fn(Vec<u8>) + Send + Sync + 'static,
        error_handler: impl Fn(&Error) + Send + Sync + 'static,
        log_handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<Self> {
        let parsed = RtspUrl::parse(url)?;
        let log_handler: LogCallback = Arc::new(log_handler);
        let error_handler: ErrorCallback = Arc::new(error_handler);

        log_handler(&format!("rtsp client created for URL: {url}"));

        let addr = (parsed.host.as_str(), parsed.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Resolve(format!("no addresses for host {:?}", parsed.host)))?;
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader_stream = stream.try_clone()?;

        let pending = Arc::new(Pending {
            next_cseq: AtomicU32::new(1),
            waiting: Mutex::new(HashMap::new()),
        });
        let reader_shutdown = Arc::new(AtomicBool::new(false));
        let reader_handle = reader::spawn(reader_stream, pending.clone(), log_handler.clone(), reader_shutdown.clone());

        Ok(Client {
            url: parsed,
            writer: Mutex::new(stream),
            pending,
            state: Mutex::new(ClientState::Init),
            session_id: Mutex::new(None),
            config: Mutex::new(ClientConfig::default()),
            frame_handler: Arc::new(frame_handler),
            error_handler,
            log_handler,
            stats_handler: Mutex::new(None),
            receiver: Mutex::new(None),
            reader_shutdown,
            reader_handle: Mutex::new(Some(reader_handle)),
        })
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Set the Bernoulli drop probability and FEC group size advertised to
    /// the server on the next `setup()`. `enable = false` (the default)
    /// omits the `Require`/`MKN-Options` headers entirely (spec.md §4.5).
    pub fn set_mkn_options(&self, enable: bool, bernoulli_p: f64, fec_k: u16, fec_p: u16) {
        *self.config.lock() = ClientConfig {
            mkn_enabled: enable,
            bernoulli_p,
            fec_k,
            fec_p,
        };
    }

    /// Register a callback invoked with `{received, expected, corrected,
    /// uncorrectable}` after every media packet, once SETUP has built the
    /// RTP receiver (spec.md §4.7). Has no effect once `setup()` has
    /// already run; call before `setup()`.
    pub fn set_rtp_statistics_handler(&self, handler: impl Fn(Stats) + Send + Sync + 'static) {
        *self.stats_handler.lock() = Some(Arc::new(handler));
    }

    /// Allowed only from `Init`. Advertises a client-chosen UDP port,
    /// negotiates MKN options if configured, and on success builds the RTP
    /// receiver and transitions to `Ready` (spec.md §4.5).
    pub fn setup(&self) -> Result<()> {
        if *self.state.lock() != ClientState::Init {
            return Err(self.fail(Error::WrongState(format!(
                "SETUP not valid in state {:?}",
                self.state()
            ))));
        }

        let client_port: u16 = rand::rng().random_range(CLIENT_PORT_RANGE);
        let config = *self.config.lock();

        let mut headers = vec![(
            "Transport".to_string(),
            format!("RTP/AVP/UDP;unicast;client_port={client_port}"),
        )];
        if config.mkn_enabled {
            headers.push(("Require".to_string(), mkn::OPTION_TAG.to_string()));
            let opts = MknOptions {
                bernoulli_p: config.bernoulli_p,
                fec_k: config.fec_k,
                fec_p: config.fec_p,
            };
            headers.push((mkn::HEADER_NAME.to_string(), opts.serialize()));
        }

        let response = self.send_request("SETUP", &self.full_uri(), &headers)?;
        if !response.is_success() {
            return Err(self.fail(Error::SetupFailed(format!(
                "{} {}",
                response.status, response.reason
            ))));
        }

        let transport_value = match response.header("Transport") {
            Some(v) => v,
            None => return Err(self.fail(Error::SetupFailed("response missing Transport header".to_string()))),
        };
        let specs = match transport::parse(&transport_value) {
            Ok(s) => s,
            Err(_) => {
                return Err(self.fail(Error::SetupFailed(format!(
                    "unparseable Transport header {transport_value:?}"
                ))))
            }
        };
        let (port, ssrc) = match parse_server_transport(&specs) {
            Some(pair) => pair,
            None => {
                return Err(self.fail(Error::SetupFailed(
                    "Transport header missing client_port/ssrc".to_string(),
                )))
            }
        };

        let session_id = response
            .header("Session")
            .map(|value| value.split(';').next().unwrap_or("").trim().to_string());

        let frame_handler = self.frame_handler.clone();
        let stats_handler = self.stats_handler.lock().clone();
        let on_stats = stats_handler.map(|cb| move |stats: Stats| cb(stats));
        let receiver = match RtpReceiver::bind(port, ssrc, move |frame| frame_handler(frame), on_stats) {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };

        *self.receiver.lock() = Some(receiver);
        *self.session_id.lock() = session_id;
        *self.state.lock() = ClientState::Ready;
        Ok(())
    }

    /// Allowed from `Ready` or `Playing`. Sends PLAY; on `200`, transitions
    /// to `Playing` (spec.md §4.5).
    pub fn play(&self) -> Result<()> {
        if !matches!(self.state(), ClientState::Ready | ClientState::Playing) {
            return Err(self.fail(Error::WrongState(format!("PLAY not valid in state {:?}", self.state()))));
        }
        let session = self.require_session()?;
        let response = self.send_request("PLAY", &self.full_uri(), &[("Session".to_string(), session)])?;
        if response.status == 200 {
            *self.state.lock() = ClientState::Playing;
            Ok(())
        } else {
            Err(self.fail(Error::WrongState(format!(
                "PLAY rejected: {} {}",
                response.status, response.reason
            ))))
        }
    }

    /// Allowed from `Playing`. Sends PAUSE; on `200`, transitions to `Ready`
    /// (spec.md §4.5).
    pub fn pause(&self) -> Result<()> {
        if self.state() != ClientState::Playing {
            return Err(self.fail(Error::WrongState(format!("PAUSE not valid in state {:?}", self.state()))));
        }
        let session = self.require_session()?;
        let response = self.send_request("PAUSE", &self.full_uri(), &[("Session".to_string(), session)])?;
        if response.status == 200 {
            *self.state.lock() = ClientState::Ready;
            Ok(())
        } else {
            Err(self.fail(Error::WrongState(format!(
                "PAUSE rejected: {} {}",
                response.status, response.reason
            ))))
        }
    }

    /// Always allowed. Sends TEARDOWN (if a session was established); on
    /// `200`, tears down the RTP receiver and transitions to `Init`
    /// (spec.md §4.5). Calling it with no session established is a no-op.
    pub fn teardown(&self) -> Result<()> {
        let session = match self.session_id.lock().clone() {
            Some(s) => s,
            None => {
                *self.state.lock() = ClientState::Init;
                return Ok(());
            }
        };
        let response = self.send_request("TEARDOWN", &self.full_uri(), &[("Session".to_string(), session)])?;
        if response.status == 200 {
            *self.receiver.lock() = None;
            *self.session_id.lock() = None;
            *self.state.lock() = ClientState::Init;
            Ok(())
        } else {
            Err(self.fail(Error::WrongState(format!(
                "TEARDOWN rejected: {} {}",
                response.status, response.reason
            ))))
        }
    }

    /// Stateless: send OPTIONS and return the response for the caller to
    /// inspect (spec.md §4.5).
    pub fn options(&self) -> Result<Response> {
        self.send_request("OPTIONS", "*", &[])
    }

    /// Stateless: send DESCRIBE and return the response for the caller to
    /// inspect (spec.md §4.5).
    pub fn describe(&self) -> Result<Response> {
        self.send_request("DESCRIBE", &self.full_uri(), &[])
    }

    fn require_session(&self) -> Result<String> {
        match self.session_id.lock().clone() {
            Some(s) => Ok(s),
            None => Err(self.fail(Error::WrongState("no session established, call setup() first".to_string()))),
        }
    }

    fn full_uri(&self) -> String {
        let scheme = if self.url.udp { "rtspu" } else { "rtsp" };
        format!("{scheme}://{}:{}{}", self.url.host, self.url.port, self.url.path)
    }

    /// Pass `error` to the registered error handler and return it, so
    /// call sites can `return Err(self.fail(...))` in one line.
    fn fail(&self, error: Error) -> Error {
        (self.error_handler)(&error);
        error
    }

    fn send_request(&self, method: &str, uri: &str, extra_headers: &[(String, String)]) -> Result<Response> {
        let cseq = self.pending.next_cseq.fetch_add(1, Ordering::SeqCst);
        let mut request = Request::new(method, uri).with_header("CSeq", cseq.to_string());
        for (name, value) in extra_headers {
            request = request.with_header(name.clone(), value.clone());
        }

        let (tx, rx) = mpsc::channel();
        self.pending.waiting.lock().insert(cseq, tx);
        (self.log_handler)(&format!("-> {method} {uri} (CSeq {cseq})"));

        {
            let mut writer = self.writer.lock();
            if let Err(e) = writer.write_all(request.serialize().as_bytes()) {
                self.pending.waiting.lock().remove(&cseq);
                return Err(self.fail(Error::Io(e)));
            }
        }

        match rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(response) => {
                (self.log_handler)(&format!("<- {} {} (CSeq {cseq})", response.status, response.reason));
                Ok(response)
            }
            Err(_) => {
                self.pending.waiting.lock().remove(&cseq);
                Err(self.fail(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "RTSP response timed out",
                ))))
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_shutdown.store(true, Ordering::SeqCst);
        if let Ok(stream) = self.writer.lock().try_clone() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(handle) = self.reader_handle.lock().take() {
            let _ = handle.join();
        }
        (self.log_handler)("rtsp client destroyed");
    }
}

/// Select the first spec that is `RTP/AVP/UDP` with first parameter
/// `unicast`, and extract its client port (or general port) and SSRC
/// (spec.md §4.5).
fn parse_server_transport(specs: &[TransportSpec]) -> Option<(u16, u32)> {
    let spec = specs.iter().find(|s| {
        s.transport_protocol.eq_ignore_ascii_case("RTP")
            && s.profile.eq_ignore_ascii_case("AVP")
            && s.lower_transport
                .as_deref()
                .map(|t| t.eq_ignore_ascii_case("UDP"))
                .unwrap_or(false)
            && matches!(s.parameters.first(), Some(Parameter::Token(t)) if t.eq_ignore_ascii_case("unicast"))
    })?;

    let port_value = spec.client_port().or_else(|| {
        spec.parameters.iter().find_map(|p| match p {
            Parameter::Port(v) => Some(*v),
            _ => None,
        })
    })?;
    let port: u16 = match port_value {
        PortValue::Single(p) => p.try_into().ok()?,
        PortValue::Range(lo, _) => lo.try_into().ok()?,
    };

    let ssrc = spec.ssrc()?;
    Some((port, ssrc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: &str) -> TransportSpec {
        transport::parse(value).unwrap().remove(0)
    }

    #[test]
    fn extracts_client_port_and_ssrc() {
        let specs = vec![spec("RTP/AVP/UDP;unicast;client_port=6000-6001;ssrc=0A0B0C0D")];
        assert_eq!(parse_server_transport(&specs), Some((6000, 0x0A0B0C0D)));
    }

    #[test]
    fn falls_back_to_general_port() {
        let specs = vec![spec("RTP/AVP/UDP;unicast;port=7000;ssrc=00000001")];
        assert_eq!(parse_server_transport(&specs), Some((7000, 1)));
    }

    #[test]
    fn skips_non_matching_specs() {
        let specs = vec![
            spec("RTP/AVP;multicast;ttl=127"),
            spec("RTP/AVP/UDP;unicast;client_port=5000;ssrc=00000002"),
        ];
        assert_eq!(parse_server_transport(&specs), Some((5000, 2)));
    }

    #[test]
    fn missing_ssrc_fails() {
        let specs = vec![spec("RTP/AVP/UDP;unicast;client_port=5000")];
        assert_eq!(parse_server_transport(&specs), None);
    }

    #[test]
    fn default_config_disables_mkn() {
        let config = ClientConfig::default();
        assert!(!config.mkn_enabled);
    }
}
