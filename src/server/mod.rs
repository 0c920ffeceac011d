//! RTSP server orchestrator and connection layer (spec.md §4.4, §5).
//!
//! [`Server`] owns the session registry and the sockets: a mandatory TCP
//! (and UDP) listener on the IPv4 family, plus a best-effort IPv6 sibling
//! of each (spec.md §9's "v4 mandatory, v6 best-effort" policy, carried
//! over from the receiver's bind strategy). Every accepted TCP connection
//! and every UDP datagram is handed to the same [`crate::protocol::Dispatcher`].

mod datagram;
mod tcp;

use std::net::{TcpListener, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::protocol::Dispatcher;
use crate::session::SessionRegistry;

/// Server-side configuration (spec.md §6 CLI, §5 timeouts).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory SETUP request-URIs are resolved against. Read-only after
    /// construction (spec.md §5).
    pub resource_root: PathBuf,
    /// TCP idle timeout in seconds before a connection is dropped and its
    /// sessions purged (spec.md §5; default 240).
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            resource_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            idle_timeout_secs: 240,
        }
    }
}

/// High-level RTSP server: owns the session registry and the listening
/// sockets, and runs the accept/read loops on background threads.
pub struct Server {
    bind_addr: String,
    config: ServerConfig,
    registry: SessionRegistry,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: impl Into<String>, config: ServerConfig) -> Self {
        Server {
            bind_addr: bind_addr.into(),
            config,
            registry: SessionRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Bind the listening sockets and spawn the accept/read loops.
    ///
    /// Fails loudly (spec.md §7) if the resource root is missing or isn't a
    /// directory, or if the mandatory IPv4 TCP/UDP ports can't be bound.
    /// The IPv6 siblings of each are best-effort: a bind failure is logged
    /// at `warn!` and that family is simply not serviced.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        if !self.config.resource_root.is_dir() {
            return Err(Error::ResourceNotFound(
                self.config.resource_root.display().to_string(),
            ));
        }

        let tcp_v4 = TcpListener::bind(&self.bind_addr)?;
        let port = tcp_v4.local_addr()?.port();
        let tcp_v6 = match TcpListener::bind(("::", port)) {
            Ok(l) => Some(l),
            Err(e) => {
                tracing::warn!(error = %e, port, "IPv6 TCP listener bind failed, continuing on v4 only");
                None
            }
        };

        let udp_v4 = UdpSocket::bind(("0.0.0.0", port))?;
        let udp_v6 = match UdpSocket::bind(("::", port)) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, port, "IPv6 UDP listener bind failed, continuing on v4 only");
                None
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(self.registry.clone(), self.config.clone()));
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        tracing::info!(addr = %self.bind_addr, port, "RTSP server listening");

        self.handles
            .push(tcp::spawn_accept_loop(tcp_v4, dispatcher.clone(), self.idle_timeout(), running.clone()));
        if let Some(listener) = tcp_v6 {
            self.handles
                .push(tcp::spawn_accept_loop(listener, dispatcher.clone(), self.idle_timeout(), running.clone()));
        }
        self.handles.push(datagram::spawn_datagram_loop(udp_v4, dispatcher.clone(), running.clone()));
        if let Some(socket) = udp_v6 {
            self.handles.push(datagram::spawn_datagram_loop(socket, dispatcher, running.clone()));
        }

        Ok(())
    }

    /// Signal every background loop to exit and join them. Listening
    /// sockets are dropped (and so closed) once their owning thread returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.idle_timeout_secs)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_resource_root() {
        let mut server = Server::with_config(
            "127.0.0.1:0",
            ServerConfig {
                resource_root: PathBuf::from("/does/not/exist/mjrtsp"),
                ..ServerConfig::default()
            },
        );
        assert!(matches!(server.start(), Err(Error::ResourceNotFound(_))));
    }

    #[test]
    fn double_start_is_already_running() {
        let dir = std::env::temp_dir().join("mjrtsp-server-test-already-running");
        std::fs::create_dir_all(&dir).unwrap();
        let mut server = Server::with_config(
            "127.0.0.1:0",
            ServerConfig {
                resource_root: dir.clone(),
                ..ServerConfig::default()
            },
        );
        server.start().unwrap();
        assert!(matches!(server.start(), Err(Error::AlreadyRunning)));
        server.stop();
        std::fs::remove_dir_all(&dir).ok();
    }
}
