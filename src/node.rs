//! Node
//!
//! Wires one cluster member together: engine, the two servers and the
//! replication pollers.
//!
//! ## Lifecycle
//! ```text
//! start:    Engine::open ─▶ bind client + replication ports ─▶ spawn pollers
//! shutdown: stop pollers ─▶ stop servers ─▶ Engine::close (drain + sync)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::cluster::{NodeDirectory, PeerCursor, PollerOptions, ReplicationPoller};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::network::{Endpoint, Server, ShutdownHandle};

/// A server thread and the handle that stops it
struct RunningServer {
    endpoint: Endpoint,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<Result<()>>>,
}

/// A running cluster member
pub struct Node {
    engine: Arc<Engine>,
    directory: NodeDirectory,

    client_addr: SocketAddr,
    replication_addr: SocketAddr,

    servers: Vec<RunningServer>,
    poller: Option<ReplicationPoller>,

    stopped: bool,
}

impl Node {
    /// Open the engine, bind both ports and start polling every peer
    pub fn start(config: Config) -> Result<Self> {
        let directory = NodeDirectory::from_config(&config)?;
        let engine = Arc::new(Engine::open(config.clone())?);

        let client = Server::new(config.clone(), Arc::clone(&engine), Endpoint::Client)?;
        let replication = Server::new(config.clone(), Arc::clone(&engine), Endpoint::Replication)?;
        let client_addr = client.local_addr()?;
        let replication_addr = replication.local_addr()?;

        let mut node = Self {
            engine,
            directory,
            client_addr,
            replication_addr,
            servers: Vec::with_capacity(2),
            poller: None,
            stopped: false,
        };

        // From here on a failure drops `node`, which stops what already runs
        for server in [client, replication] {
            node.servers.push(Self::spawn_server(server, &config.node.node_id)?);
        }
        node.poller = Some(ReplicationPoller::spawn(
            Arc::clone(&node.engine),
            &node.directory,
            PollerOptions::from_config(&config),
        )?);

        tracing::info!(
            node = %config.node.node_id,
            %client_addr,
            %replication_addr,
            peers = node.directory.peer_count(),
            "node started"
        );

        Ok(node)
    }

    fn spawn_server(server: Server, node_id: &str) -> Result<RunningServer> {
        let endpoint = server.endpoint();
        let handle = server.shutdown_handle();
        let thread = thread::Builder::new()
            .name(format!("driftkv-{}-{}", node_id, endpoint.name()))
            .spawn(move || server.run())?;

        Ok(RunningServer {
            endpoint,
            handle,
            thread: Some(thread),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn node_id(&self) -> &str {
        self.engine.node_id()
    }

    /// Bound address of the client port
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Bound address of the replication port
    pub fn replication_addr(&self) -> SocketAddr {
        self.replication_addr
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    /// How far this node has merged `peer_id`'s log
    ///
    /// `None` until the peer has been reached once.
    pub fn peer_cursor(&self, peer_id: &str) -> Option<PeerCursor> {
        self.poller.as_ref().and_then(|p| p.cursor(peer_id))
    }

    /// Block until both servers exit, then shut down
    pub fn wait(mut self) -> Result<()> {
        for server in &mut self.servers {
            if let Some(thread) = server.thread.take() {
                join_server(server.endpoint, thread)?;
            }
        }
        self.stop()
    }

    /// Stop replication and the servers, then close the engine
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if let Some(poller) = self.poller.take() {
            poller.shutdown();
        }

        for server in &self.servers {
            server.handle.shutdown();
        }
        let mut first_err = None;
        for server in &mut self.servers {
            if let Some(thread) = server.thread.take() {
                if let Err(e) = join_server(server.endpoint, thread) {
                    first_err.get_or_insert(e);
                }
            }
        }

        let closed = self.engine.close();
        tracing::info!(node = %self.engine.node_id(), "node stopped");

        match first_err {
            Some(e) => Err(e),
            None => closed,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("node shutdown failed: {}", e);
        }
    }
}

fn join_server(endpoint: Endpoint, thread: JoinHandle<Result<()>>) -> Result<()> {
    match thread.join() {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(endpoint = endpoint.name(), "server thread panicked");
            Ok(())
        }
    }
}
