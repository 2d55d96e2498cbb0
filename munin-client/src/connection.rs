//! # Node Connection
//!
//! Purpose: Own the single TCP stream to a node and expose line-oriented
//! send plus the two read primitives, with transparent reopen on writes.
//!
//! ## Design Principles
//! 1. **Explicit State**: `Idle`, `Connected`, `Closed` are enum states, so a
//!    closed connection cannot hold a socket.
//! 2. **One Retry**: A failed write is retried once after reopening when
//!    reconnect is enabled; reads never retry.
//! 3. **Buffer Reuse**: Line and write buffers live on the connection.
//! 4. **Clean Restart**: Any failed read drops the socket so the next request
//!    never sees the tail of a broken reply.

use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{NodeError, NodeResult};
use crate::framing;

/// Socket-level settings for a node connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Node host name or address.
    pub host: String,
    /// Node port, 4949 by convention.
    pub port: u16,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Read the `# munin node at ...` line the node sends on accept.
    pub expect_greeting: bool,
}

enum State {
    Idle,
    Connected(BufReader<TcpStream>),
    Closed,
}

/// Persistent connection to one node.
pub struct Connection {
    config: ConnectionConfig,
    state: State,
    auto_reconnect: bool,
    greeting: Option<String>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Creates an unopened connection; the socket is opened on first use.
    pub fn new(config: ConnectionConfig, auto_reconnect: bool) -> Self {
        Connection {
            config,
            state: State::Idle,
            auto_reconnect,
            greeting: None,
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(64),
        }
    }

    /// Returns true while a socket is held.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    /// Whether closed connections are reopened transparently.
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// Greeting line received on the most recent open, if any.
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    /// Opens the socket. No-op when already connected.
    pub fn open(&mut self) -> NodeResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.greeting = None;

        let stream = connect_stream(&self.config)?;
        if let Some(timeout) = self.config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = self.config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        stream.set_nodelay(true)?;

        let mut reader = BufReader::new(stream);
        if self.config.expect_greeting {
            let greeting = framing::read_line(&mut reader, &mut self.line_buf)?;
            if !greeting.starts_with('#') {
                return Err(NodeError::InvalidResponse(format!(
                    "unexpected greeting: {:?}",
                    greeting
                )));
            }
            self.greeting = Some(greeting);
        }

        debug!(host = %self.config.host, port = self.config.port, "connected to node");
        self.state = State::Connected(reader);
        Ok(())
    }

    /// Drops the socket and records whether later calls may reopen it.
    pub fn close(&mut self, reconnect: bool) {
        if self.is_connected() {
            debug!(host = %self.config.host, port = self.config.port, reconnect, "closing connection");
        }
        self.state = State::Closed;
        self.auto_reconnect = reconnect;
    }

    /// Writes one request line.
    pub fn send_data(&mut self, command: &str) -> NodeResult<()> {
        framing::encode_command(command, &mut self.write_buf)?;
        self.ensure_open()?;

        match self.write_pending() {
            Ok(()) => Ok(()),
            Err(err) if self.auto_reconnect => {
                warn!(host = %self.config.host, error = %err, "write failed, reconnecting once");
                self.state = State::Closed;
                self.open()?;
                let retried = self.write_pending();
                self.track(retried)
            }
            Err(err) => {
                self.state = State::Closed;
                Err(err)
            }
        }
    }

    /// Reads one reply line without its terminator.
    pub fn read_line(&mut self) -> NodeResult<String> {
        let State::Connected(reader) = &mut self.state else {
            return Err(NodeError::not_connected());
        };
        let line = framing::read_line(reader, &mut self.line_buf);
        self.track(line)
    }

    /// Reads a `.`-terminated packet; the sentinel is not returned.
    pub fn read_packet(&mut self) -> NodeResult<Vec<String>> {
        let State::Connected(reader) = &mut self.state else {
            return Err(NodeError::not_connected());
        };
        let packet = framing::read_packet(reader, &mut self.line_buf);
        self.track(packet)
    }

    fn ensure_open(&mut self) -> NodeResult<()> {
        match self.state {
            State::Connected(_) => Ok(()),
            State::Idle => self.open(),
            State::Closed if self.auto_reconnect => {
                debug!(host = %self.config.host, "reopening closed connection");
                self.open()
            }
            State::Closed => Err(NodeError::not_connected()),
        }
    }

    fn write_pending(&mut self) -> NodeResult<()> {
        let State::Connected(reader) = &mut self.state else {
            return Err(NodeError::not_connected());
        };
        let stream = reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    fn track<T>(&mut self, result: NodeResult<T>) -> NodeResult<T> {
        if let Err(err) = &result {
            debug!(host = %self.config.host, error = %err, "dropping connection after failure");
            self.state = State::Closed;
        }
        result
    }
}

fn connect_stream(config: &ConnectionConfig) -> NodeResult<TcpStream> {
    let Some(timeout) = config.connect_timeout else {
        return Ok(TcpStream::connect((config.host.as_str(), config.port))?);
    };

    let mut last_err = None;
    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(NodeError::Connection(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {}:{}", config.host, config.port),
        )
    })))
}
