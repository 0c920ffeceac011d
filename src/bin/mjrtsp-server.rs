//! Standalone RTSP server binary (spec.md §6), grounded on
//! `crates/cli/src/main.rs`: parses `<port> [<resource_path>]`, starts a
//! [`mjrtsp::Server`], and shuts down when `quit` is read from stdin.
//!
//! This binary is illustrative only — the out-of-scope GUI wrapper's
//! richer argument parsing, resource-root validation UX, and shutdown
//! prompt wording are not elaborated beyond what's needed to exercise the
//! library end to end (spec.md §1, SPEC_FULL.md §12).

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;

use mjrtsp::server::ServerConfig;
use mjrtsp::Server;

const USAGE: &str = "usage: mjrtsp-server <port> [<resource_path>]\n\n\
    port            TCP/UDP port to bind (default 554)\n\
    resource_path   directory SETUP request-URIs resolve against (default: current directory)";

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "-?") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let port: u16 = match args.first() {
        Some(p) => match p.parse() {
            Ok(p) => p,
            Err(_) => {
                eprintln!("invalid port {p:?}\n\n{USAGE}");
                return ExitCode::FAILURE;
            }
        },
        None => 554,
    };
    let resource_root = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = ServerConfig {
        resource_root,
        ..ServerConfig::default()
    };
    let mut server = Server::with_config(format!("0.0.0.0:{port}"), config);

    if let Err(e) = server.start() {
        eprintln!("failed to start server: {e}");
        return ExitCode::FAILURE;
    }
    println!("RTSP server listening on port {port} — type 'quit' to stop");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim() == "quit" => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    server.stop();
    ExitCode::SUCCESS
}
