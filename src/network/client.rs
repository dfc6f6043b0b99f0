//! Client
//!
//! Blocking connection to a node, used by the replication poller and the CLI.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::backup::LogIndex;
use crate::error::{DriftError, Result};
use crate::protocol::{read_response, write_command, Command, FetchBatch, Response, Status};
use crate::store::Version;

/// A connection to one node's client or replication port
pub struct Client {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Remote address for errors and logging
    addr: String,

    /// Applied to connect and to every read/write
    timeout: Duration,
}

impl Client {
    /// Connect to `addr`, giving up after `timeout`
    ///
    /// Refused or unresolvable addresses are `PeerUnreachable`; a connect
    /// that does not complete in time is `PeerTimeout`.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let targets: Vec<_> = addr
            .to_socket_addrs()
            .map_err(|e| DriftError::PeerUnreachable {
                peer: addr.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        let mut last_err = None;
        for target in targets {
            match TcpStream::connect_timeout(&target, timeout) {
                Ok(stream) => return Self::from_stream(stream, addr, timeout),
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) if is_timeout(&e) => DriftError::PeerTimeout {
                peer: addr.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
            Some(e) => DriftError::PeerUnreachable {
                peer: addr.to_string(),
                reason: e.to_string(),
            },
            None => DriftError::PeerUnreachable {
                peer: addr.to_string(),
                reason: "address resolved to nothing".to_string(),
            },
        })
    }

    fn from_stream(stream: TcpStream, addr: &str, timeout: Duration) -> Result<Self> {
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            addr: addr.to_string(),
            timeout,
        })
    }

    /// Send one command and wait for its response
    pub fn call(&mut self, command: &Command) -> Result<Response> {
        tracing::trace!(addr = %self.addr, ?command, "sending command");
        write_command(&mut self.writer, command).map_err(|e| self.classify(e))?;
        read_response(&mut self.reader).map_err(|e| self.classify(e))
    }

    /// Get a value; `None` when the key is absent or deleted
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.call(&Command::Get {
            key: key.to_string(),
        })?;
        match response.status {
            Status::Ok => Ok(Some(response.payload.unwrap_or_default())),
            Status::NotFound => Ok(None),
            Status::Error => Err(DriftError::Remote(response.error_message())),
        }
    }

    /// Put a value and return the version it was stored under
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<Version> {
        let response = self.call(&Command::Put {
            key: key.to_string(),
            value: value.to_vec(),
        })?;
        Self::expect_ok(&response)?;
        response.version()
    }

    /// Delete a key and return the tombstone's version
    pub fn delete(&mut self, key: &str) -> Result<Version> {
        let response = self.call(&Command::Delete {
            key: key.to_string(),
        })?;
        Self::expect_ok(&response)?;
        response.version()
    }

    /// Health check
    pub fn ping(&mut self) -> Result<()> {
        let response = self.call(&Command::Ping)?;
        Self::expect_ok(&response)
    }

    /// Log records with index > `since`, at most `limit`
    pub fn fetch(&mut self, since: LogIndex, limit: u32) -> Result<FetchBatch> {
        let response = self.call(&Command::Fetch { since, limit })?;
        Self::expect_ok(&response)?;
        response.fetch_batch()
    }

    /// Remote address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn expect_ok(response: &Response) -> Result<()> {
        match response.status {
            Status::Ok => Ok(()),
            Status::NotFound => Err(DriftError::Protocol("unexpected NOT_FOUND".to_string())),
            Status::Error => Err(DriftError::Remote(response.error_message())),
        }
    }

    /// Map socket failures onto the transient peer errors
    fn classify(&self, err: DriftError) -> DriftError {
        match err {
            DriftError::Io(ref e) if is_timeout(e) => DriftError::PeerTimeout {
                peer: self.addr.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            },
            DriftError::Io(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::UnexpectedEof
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                ) =>
            {
                DriftError::PeerUnreachable {
                    peer: self.addr.clone(),
                    reason: e.to_string(),
                }
            }
            other => other,
        }
    }
}

/// Read timeouts surface as WouldBlock on Unix and TimedOut on Windows
fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
