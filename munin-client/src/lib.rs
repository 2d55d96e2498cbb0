//! # Munin Node Client
//!
//! Purpose: Provide a lightweight, synchronous client for the munin node
//! protocol: list a node's services, read their configuration, and sample
//! their current values over one persistent TCP connection.
//!
//! ## Design Principles
//! 1. **Single Session**: One connection, strictly request-then-reply.
//! 2. **Transparent Reconnect**: Writes reopen a closed connection once when
//!    reconnect is enabled.
//! 3. **Session Memoization**: `version`, `list`, `nodes` and `config` replies
//!    are fetched once per client.
//! 4. **Protocol Clarity**: Framing and parsing are pure functions, tested
//!    without sockets.
//!
//! ## Usage
//!
//! ```no_run
//! use munin_client::NodeClient;
//!
//! let mut node = NodeClient::new("127.0.0.1", 4949);
//! let services = node.list()?;
//! let values = node.fetch(services.to_vec())?;
//! # Ok::<(), munin_client::NodeError>(())
//! ```

mod cache;
mod client;
mod connection;
mod error;
mod framing;
mod parser;

pub use cache::Cache;
pub use client::{
    ClientConfig, ConfigReport, NodeClient, Reply, ServiceOutcome, ServiceReport, Services,
    BANNER_PREFIX, DEFAULT_PORT,
};
pub use connection::{Connection, ConnectionConfig};
pub use error::{NodeError, NodeResult, ServiceFailure};
pub use framing::{read_line, read_packet, PACKET_SENTINEL};
pub use parser::{
    packet_failure, parse_config, parse_fetch, parse_graph_args, FetchValues, GraphArgs,
    ServiceConfig, UNKNOWN_VALUE,
};
