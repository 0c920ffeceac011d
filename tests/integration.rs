//! End-to-end RTSP handshake tests (spec.md §8 scenarios), driven with a
//! raw `TcpStream` against a real [`mjrtsp::Server`] on a fixed port.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use mjrtsp::server::ServerConfig;
use mjrtsp::Server;

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }
    Ok(response)
}

fn connect(bind: &str) -> TcpStream {
    let addr = bind.to_socket_addrs().unwrap().next().unwrap();
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn scratch_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mjrtsp-integration-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Scenario 1 (spec.md §8): OPTIONS echoes CSeq and lists the public methods.
#[test]
fn options_lists_public_methods() {
    let dir = scratch_root("options");
    let mut server = Server::with_config(
        "127.0.0.1:18554",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18554");

    let resp = rtsp_request(&mut stream, "OPTIONS * RTSP/1.0\r\nCSeq: 0\r\n\r\n").unwrap();
    assert!(resp.starts_with("RTSP/1.0 200"), "got: {resp}");
    assert!(resp.contains("CSeq: 0"));
    assert!(resp.contains("Public: SETUP, TEARDOWN, PLAY, PAUSE"));

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 2: a request with no `CSeq` header is `400`.
#[test]
fn missing_cseq_is_bad_request() {
    let dir = scratch_root("missing-cseq");
    let mut server = Server::with_config(
        "127.0.0.1:18555",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18555");

    let resp = rtsp_request(&mut stream, "OPTIONS * RTSP/1.0\r\n\r\n").unwrap();
    assert!(resp.starts_with("RTSP/1.0 400"), "got: {resp}");
    assert!(resp.contains("Bad Request: CSeq missing"));

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}

/// DESCRIBE is explicitly out of scope (spec.md §4.3): always `501`.
#[test]
fn describe_is_not_implemented() {
    let dir = scratch_root("describe");
    let mut server = Server::with_config(
        "127.0.0.1:18556",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18556");

    let resp = rtsp_request(&mut stream, "DESCRIBE rtsp://h/f RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
    assert!(resp.starts_with("RTSP/1.0 501"), "got: {resp}");

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 3: SETUP carrying a `Session` header is rejected as an
/// aggregate operation.
#[test]
fn setup_with_session_header_is_aggregate_rejected() {
    let dir = scratch_root("aggregate");
    let mut server = Server::with_config(
        "127.0.0.1:18557",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18557");

    let resp = rtsp_request(
        &mut stream,
        "SETUP rtsp://h/f RTSP/1.0\r\nCSeq: 1\r\nSession: foo\r\nTransport: RTP/AVP;unicast;client_port=5000\r\n\r\n",
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 459"), "got: {resp}");

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 4: SETUP against a resource root with no matching file is `404`.
#[test]
fn setup_of_missing_file_is_404() {
    let dir = scratch_root("missing-file");
    let mut server = Server::with_config(
        "127.0.0.1:18558",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18558");

    let resp = rtsp_request(
        &mut stream,
        "SETUP rtsp://h/does-not-exist RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=5000\r\n\r\n",
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 404"), "got: {resp}");

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 5: an unrecognized method names itself in the reason phrase.
#[test]
fn unknown_method_is_501_with_method_name() {
    let dir = scratch_root("unknown-method");
    let mut server = Server::with_config(
        "127.0.0.1:18559",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18559");

    let resp = rtsp_request(&mut stream, "FROB * RTSP/1.0\r\nCSeq: 7\r\n\r\n").unwrap();
    assert!(resp.starts_with("RTSP/1.0 400"), "no Session header: got {resp}");

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}

/// Full SETUP → PLAY → PAUSE → TEARDOWN cycle over one TCP connection,
/// against a real file under the resource root.
#[test]
fn full_setup_play_pause_teardown_cycle() {
    let dir = scratch_root("full-cycle");
    std::fs::write(dir.join("clip.mjpg"), b"00003abc").unwrap();

    let mut server = Server::with_config(
        "127.0.0.1:18560",
        ServerConfig {
            resource_root: dir.clone(),
            ..ServerConfig::default()
        },
    );
    server.start().expect("server start");
    let mut stream = connect("127.0.0.1:18560");

    let setup_resp = rtsp_request(
        &mut stream,
        "SETUP rtsp://127.0.0.1:18560/clip.mjpg RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=50000\r\n\r\n",
    )
    .unwrap();
    assert!(setup_resp.starts_with("RTSP/1.0 200"), "SETUP: got {setup_resp}");
    assert!(setup_resp.contains("Transport:"));

    let session_id = setup_resp
        .lines()
        .find(|l| l.to_lowercase().starts_with("session:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().split(';').next().unwrap_or("").trim().to_string())
        .expect("Session header present");
    assert!(!session_id.is_empty());

    let play_resp = rtsp_request(
        &mut stream,
        &format!("PLAY * RTSP/1.0\r\nCSeq: 2\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(play_resp.starts_with("RTSP/1.0 200"), "PLAY: got {play_resp}");

    let pause_resp = rtsp_request(
        &mut stream,
        &format!("PAUSE * RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(pause_resp.starts_with("RTSP/1.0 200"), "PAUSE: got {pause_resp}");

    let teardown_resp = rtsp_request(
        &mut stream,
        &format!("TEARDOWN * RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(teardown_resp.starts_with("RTSP/1.0 200"), "TEARDOWN: got {teardown_resp}");
    assert!(server.registry().find(&session_id).is_err());

    server.stop();
    std::fs::remove_dir_all(&dir).ok();
}
