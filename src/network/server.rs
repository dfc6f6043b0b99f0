//! TCP Server
//!
//! Accepts connections and hands each one to its own thread.

use std::io::{BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::protocol::{write_response, Response};
use super::{Connection, Endpoint};

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// TCP server for one port of a node
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    endpoint: Endpoint,

    /// Non-blocking listener, polled by `run`
    listener: TcpListener,

    shutdown: Arc<AtomicBool>,

    /// Connections currently being served
    active: Arc<AtomicUsize>,
}

/// Stops a running [`Server`] from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decrements the active connection count when a handler thread exits
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Server {
    /// Bind the endpoint's port from the local node settings
    ///
    /// Port 0 binds an ephemeral port; see [`Server::local_addr`].
    pub fn new(config: Config, engine: Arc<Engine>, endpoint: Endpoint) -> Result<Self> {
        let addr = match endpoint {
            Endpoint::Client => config.node.client_addr(),
            Endpoint::Replication => config.node.replication_addr(),
        };

        let listener = TcpListener::bind(&addr)?;
        listener.set_nonblocking(true)?;

        tracing::info!(endpoint = endpoint.name(), addr = %listener.local_addr()?, "listening");

        Ok(Self {
            config,
            engine,
            endpoint,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    tracing::warn!(endpoint = self.endpoint.name(), "accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        tracing::info!(
            endpoint = self.endpoint.name(),
            active = self.active_connections(),
            "server stopped accepting"
        );
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
            tracing::warn!(%peer, max = self.config.max_connections, "connection limit reached");
            let mut writer = BufWriter::new(stream);
            if let Err(e) = write_response(&mut writer, &Response::error("too many connections")) {
                tracing::debug!("Failed to send rejection to {}: {}", peer, e);
            }
            return;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));
        let engine = Arc::clone(&self.engine);
        let shutdown = Arc::clone(&self.shutdown);
        let endpoint = self.endpoint;
        let read_ms = self.config.read_timeout_ms;
        let write_ms = self.config.write_timeout_ms;

        let spawned = thread::Builder::new()
            .name(format!("driftkv-{}-conn", endpoint.name()))
            .spawn(move || {
                let _guard = guard;
                let result = stream
                    .set_nonblocking(false)
                    .map_err(Into::into)
                    .and_then(|_| Connection::new(stream, engine, endpoint, shutdown))
                    .and_then(|mut conn| {
                        conn.set_timeouts(read_ms, write_ms)?;
                        conn.handle()
                    });

                if let Err(e) = result {
                    tracing::debug!(%peer, "connection ended with error: {}", e);
                }
            });

        if let Err(e) = spawned {
            tracing::error!(%peer, "failed to spawn connection thread: {}", e);
        }
    }
}
