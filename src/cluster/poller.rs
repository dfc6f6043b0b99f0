//! Replication Poller
//!
//! One thread per peer pulls the peer's log and merges it locally.
//!
//! ## Per-peer cycle
//! ```text
//!  Idle ──tick──▶ Connecting ──▶ Fetching ──▶ Merging ──▶ Idle
//!                     │              │
//!                     └── failure ───┴──▶ Idle (cursor unchanged)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;

use crate::backup::{LogIndex, LogRecord};
use crate::config::{Config, NodeSettings};
use crate::engine::{ApplyOutcome, Engine};
use crate::error::Result;
use crate::network::Client;
use super::NodeDirectory;

/// Where a peer's poller is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Connecting,
    Fetching,
    Merging,
}

/// How much of a peer's log has been merged here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCursor {
    pub node_id: String,

    /// Peer-local index of the last merged record
    pub last_applied_index: LogIndex,
}

/// Timing and sizing for the pollers
#[derive(Debug, Clone, Copy)]
pub struct PollerOptions {
    pub poll_interval: Duration,

    /// Bound on connect and on each read/write of a fetch
    pub fetch_timeout: Duration,

    pub batch_size: u32,
}

impl PollerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            fetch_timeout: config.fetch_timeout(),
            batch_size: config.fetch_batch_size,
        }
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Records received from the peer
    pub fetched: usize,

    /// Records that replaced the local entry
    pub applied: usize,

    /// Records discarded as not newer
    pub stale: usize,

    /// Cursor after the cycle
    pub cursor: LogIndex,
}

/// Read-only view of every peer's cursor, written by the peer threads
type SharedCursors = Arc<RwLock<HashMap<String, PeerCursor>>>;

/// Replication state for a single peer
///
/// Owned by that peer's thread; `poll_once` is public so a cycle can be
/// driven by hand.
pub struct PeerPoller {
    engine: Arc<Engine>,
    peer: NodeSettings,
    options: PollerOptions,

    /// Created on the first successful fetch
    cursor: Option<PeerCursor>,

    state: PollState,

    shared: SharedCursors,
}

impl PeerPoller {
    pub fn new(engine: Arc<Engine>, peer: NodeSettings, options: PollerOptions) -> Self {
        Self::with_shared(engine, peer, options, Arc::default())
    }

    fn with_shared(
        engine: Arc<Engine>,
        peer: NodeSettings,
        options: PollerOptions,
        shared: SharedCursors,
    ) -> Self {
        Self {
            engine,
            peer,
            options,
            cursor: None,
            state: PollState::Idle,
            shared,
        }
    }

    pub fn peer(&self) -> &NodeSettings {
        &self.peer
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn cursor(&self) -> Option<&PeerCursor> {
        self.cursor.as_ref()
    }

    /// Run one Connecting → Fetching → Merging cycle
    ///
    /// Errors are transient from the node's point of view: the cursor only
    /// ever reflects records that were merged, so the next cycle resumes
    /// from the right place.
    pub fn poll_once(&mut self) -> Result<PollReport> {
        let started = Instant::now();
        let result = self.cycle(started);
        self.state = PollState::Idle;
        self.publish();
        result
    }

    fn cycle(&mut self, started: Instant) -> Result<PollReport> {
        self.state = PollState::Connecting;
        let mut client = Client::connect(&self.peer.replication_addr(), self.options.fetch_timeout)?;

        let mut report = PollReport::default();
        loop {
            self.state = PollState::Fetching;
            let since = self.cursor_index();
            let batch = client.fetch(since, self.options.batch_size)?;

            let cursor = self.cursor.get_or_insert_with(|| PeerCursor {
                node_id: self.peer.node_id.clone(),
                last_applied_index: 0,
            });

            // The peer's log restarted below our cursor (volatile log)
            if batch.last_index < cursor.last_applied_index {
                tracing::warn!(
                    peer = %self.peer.node_id,
                    cursor = cursor.last_applied_index,
                    peer_last = batch.last_index,
                    "peer log rewound; resetting cursor"
                );
                cursor.last_applied_index = 0;
                continue;
            }

            self.state = PollState::Merging;
            // Batches stop at a record count or a byte budget
            let more = batch
                .records
                .last()
                .map(|r| r.index < batch.last_index)
                .unwrap_or(false);
            report.fetched += batch.records.len();
            self.merge(&batch.records, &mut report)?;

            if let Some(err) = batch.corrupt {
                tracing::warn!(peer = %self.peer.node_id, "discarding rest of batch: {}", err);
                break;
            }
            if !more || started.elapsed() >= self.options.poll_interval {
                break;
            }
        }

        report.cursor = self.cursor_index();
        Ok(report)
    }

    /// Apply records in order, advancing the cursor past each one merged
    fn merge(&mut self, records: &[LogRecord], report: &mut PollReport) -> Result<()> {
        for record in records {
            match self.engine.apply_replicated(record.entry.clone())? {
                ApplyOutcome::Applied { .. } => report.applied += 1,
                ApplyOutcome::Stale => report.stale += 1,
            }
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.last_applied_index = record.index;
            }
        }
        Ok(())
    }

    fn cursor_index(&self) -> LogIndex {
        self.cursor.as_ref().map(|c| c.last_applied_index).unwrap_or(0)
    }

    fn publish(&self) {
        if let Some(cursor) = &self.cursor {
            self.shared.write().insert(cursor.node_id.clone(), cursor.clone());
        }
    }

    /// Poll on every tick until `shutdown` is signalled or dropped
    fn run(mut self, shutdown: Receiver<()>) {
        let ticker = channel::tick(self.options.poll_interval);
        tracing::debug!(peer = %self.peer.node_id, "poller started");

        loop {
            crossbeam::select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => match self.poll_once() {
                    Ok(report) if report.fetched > 0 => tracing::debug!(
                        peer = %self.peer.node_id,
                        fetched = report.fetched,
                        applied = report.applied,
                        cursor = report.cursor,
                        "merged peer records"
                    ),
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(peer = %self.peer.node_id, "poll skipped: {}", e)
                    }
                    Err(e) => tracing::warn!(peer = %self.peer.node_id, "poll failed: {}", e),
                },
            }
        }

        tracing::debug!(peer = %self.peer.node_id, "poller stopped");
    }
}

/// The set of per-peer poller threads of a node
pub struct ReplicationPoller {
    /// Dropping the sender stops every peer thread
    shutdown_tx: Option<Sender<()>>,

    workers: Vec<JoinHandle<()>>,

    cursors: SharedCursors,
}

impl ReplicationPoller {
    /// Start one poller thread per peer in the directory
    pub fn spawn(
        engine: Arc<Engine>,
        directory: &NodeDirectory,
        options: PollerOptions,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let cursors: SharedCursors = Arc::default();

        let mut workers = Vec::with_capacity(directory.peer_count());
        for peer in directory.list_peers() {
            let poller = PeerPoller::with_shared(
                Arc::clone(&engine),
                peer.clone(),
                options,
                Arc::clone(&cursors),
            );
            let shutdown = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("driftkv-poll-{}", peer.node_id))
                .spawn(move || poller.run(shutdown))?;
            workers.push(handle);
        }

        tracing::info!(peers = workers.len(), interval = ?options.poll_interval, "replication started");

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            workers,
            cursors,
        })
    }

    /// Latest published cursor for a peer
    pub fn cursor(&self, node_id: &str) -> Option<PeerCursor> {
        self.cursors.read().get(node_id).cloned()
    }

    /// Every published cursor
    pub fn cursors(&self) -> Vec<PeerCursor> {
        self.cursors.read().values().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop all peer threads and wait for them
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Disconnecting the channel wakes every select!
        self.shutdown_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("replication poller thread panicked");
            }
        }
    }
}

impl Drop for ReplicationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
