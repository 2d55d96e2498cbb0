//! # Node Client API
//!
//! Purpose: Expose the node operations (`version`, `list`, `nodes`,
//! `config`, `fetch`) over one persistent connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `NodeClient` hides framing, parsing and caching.
//! 2. **Typed Arguments**: `Services` says up front whether one service or a
//!    batch was requested; `Reply` mirrors that shape back.
//! 3. **Per-Service Outcomes**: A batch never aborts because one service is
//!    unknown or crashed; the outcome is recorded and the loop moves on.
//! 4. **Session Memoization**: Replies that cannot change during a session are
//!    fetched once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::connection::{Connection, ConnectionConfig};
use crate::error::{NodeError, NodeResult, ServiceFailure};
use crate::parser::{packet_failure, parse_config, parse_fetch, FetchValues, ServiceConfig};

/// Port munin nodes listen on by convention.
pub const DEFAULT_PORT: u16 = 4949;

/// Prefix every node puts in front of its `version` reply.
pub const BANNER_PREFIX: &str = "munins node on";

const VERSION_KEY: &str = "version";
const LIST_KEY: &str = "list";
const NODES_KEY: &str = "nodes";

/// Configuration for a node client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Node host, e.g. "127.0.0.1".
    pub host: String,
    /// Node port.
    pub port: u16,
    /// Reopen the connection transparently after it was closed or lost.
    pub auto_reconnect: bool,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Expect a `#`-prefixed greeting line right after connecting.
    pub expect_greeting: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            auto_reconnect: true,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            expect_greeting: true,
        }
    }
}

/// One service or an ordered batch of services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Services {
    Single(String),
    Many(Vec<String>),
}

impl Services {
    /// True for `Services::Single`.
    pub fn is_single(&self) -> bool {
        matches!(self, Services::Single(_))
    }

    /// Validated names in request order.
    pub fn names(&self) -> NodeResult<Vec<&str>> {
        let names: Vec<&str> = match self {
            Services::Single(name) => vec![name.as_str()],
            Services::Many(names) => names.iter().map(String::as_str).collect(),
        };
        if names.is_empty() {
            return Err(NodeError::InvalidArgument(
                "at least one service name is required".to_string(),
            ));
        }
        for name in &names {
            validate_name(name)?;
        }
        Ok(names)
    }
}

impl From<&str> for Services {
    fn from(name: &str) -> Self {
        Services::Single(name.to_string())
    }
}

impl From<String> for Services {
    fn from(name: String) -> Self {
        Services::Single(name)
    }
}

impl From<Vec<String>> for Services {
    fn from(names: Vec<String>) -> Self {
        Services::Many(names)
    }
}

impl From<Vec<&str>> for Services {
    fn from(names: Vec<&str>) -> Self {
        Services::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Services {
    fn from(names: &[&str]) -> Self {
        Services::Many(names.iter().map(|name| name.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Services {
    fn from(names: [&str; N]) -> Self {
        Services::Many(names.iter().map(|name| name.to_string()).collect())
    }
}

/// Result shape matching the `Services` shape of the request.
///
/// `One` only when a single service was requested and it produced a result;
/// everything else, including an empty outcome, is `Many`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Reply<T> {
    /// Number of items in either shape.
    pub fn len(&self) -> usize {
        match self {
            Reply::One(_) => 1,
            Reply::Many(items) => items.len(),
        }
    }

    /// True for an empty `Many` reply.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens either shape into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Reply::One(item) => vec![item],
            Reply::Many(items) => items,
        }
    }

    /// Returns the item of a `One` reply.
    pub fn into_one(self) -> Option<T> {
        match self {
            Reply::One(item) => Some(item),
            Reply::Many(_) => None,
        }
    }
}

/// Outcome of one service within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome<T> {
    pub service: String,
    pub result: Result<T, ServiceFailure>,
}

/// Per-service outcomes of a batch, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport<T> {
    pub entries: Vec<ServiceOutcome<T>>,
}

impl<T> ServiceReport<T> {
    /// Services that produced a result.
    pub fn ok(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().filter_map(|entry| match &entry.result {
            Ok(value) => Some((entry.service.as_str(), value)),
            Err(_) => None,
        })
    }

    /// Services the node reported as failed.
    pub fn failed(&self) -> impl Iterator<Item = (&str, ServiceFailure)> {
        self.entries.iter().filter_map(|entry| match entry.result {
            Ok(_) => None,
            Err(failure) => Some((entry.service.as_str(), failure)),
        })
    }

    /// Outcome for one service.
    pub fn get(&self, service: &str) -> Option<&Result<T, ServiceFailure>> {
        self.entries
            .iter()
            .find(|entry| entry.service == service)
            .map(|entry| &entry.result)
    }

    /// Drops failed services and shapes the rest like the request.
    pub fn into_reply(self, single: bool) -> Reply<T> {
        let mut items: Vec<T> = self
            .entries
            .into_iter()
            .filter_map(|entry| entry.result.ok())
            .collect();
        if single && items.len() == 1 {
            if let Some(item) = items.pop() {
                return Reply::One(item);
            }
        }
        Reply::Many(items)
    }
}

impl<T: Clone> ServiceReport<T> {
    /// Rebuilds the report in the order of `names`.
    fn project(&self, names: &[&str]) -> ServiceReport<T> {
        let entries = names
            .iter()
            .filter_map(|name| {
                self.entries
                    .iter()
                    .find(|entry| entry.service == *name)
                    .cloned()
            })
            .collect();
        ServiceReport { entries }
    }
}

/// Config outcomes as cached by the client.
pub type ConfigReport = ServiceReport<Arc<ServiceConfig>>;

/// Client for one munin node.
///
/// All operations share one connection and run strictly request-then-reply,
/// so the client takes `&mut self`; wrap it in a mutex to share it.
pub struct NodeClient {
    connection: Connection,
    banners: Cache<Arc<str>>,
    names: Cache<Arc<[String]>>,
    configs: Cache<Arc<ConfigReport>>,
}

impl NodeClient {
    /// Creates a client for `host:port` with reconnect enabled.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let mut config = ClientConfig::default();
        config.host = host.into();
        config.port = port;
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration. Nothing is opened yet.
    pub fn with_config(config: ClientConfig) -> Self {
        let connection = Connection::new(
            ConnectionConfig {
                host: config.host,
                port: config.port,
                connect_timeout: config.connect_timeout,
                read_timeout: config.read_timeout,
                write_timeout: config.write_timeout,
                expect_greeting: config.expect_greeting,
            },
            config.auto_reconnect,
        );
        NodeClient {
            connection,
            banners: Cache::new(),
            names: Cache::new(),
            configs: Cache::new(),
        }
    }

    /// Opens the connection eagerly.
    pub fn connect(&mut self) -> NodeResult<()> {
        self.connection.open()
    }

    /// Closes the connection; `reconnect` decides whether later calls reopen it.
    pub fn disconnect(&mut self, reconnect: bool) {
        self.connection.close(reconnect);
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Greeting the node sent on the last connect.
    pub fn greeting(&self) -> Option<&str> {
        self.connection.greeting()
    }

    /// Returns the trailing token of the node's version banner.
    pub fn version(&mut self) -> NodeResult<Arc<str>> {
        let connection = &mut self.connection;
        self.banners.fetch_or_compute(VERSION_KEY, || {
            connection.send_data("version")?;
            let banner = connection.read_line()?;
            parse_banner(&banner).map(Arc::from)
        })
    }

    /// Lists the services of the node's default host.
    pub fn list(&mut self) -> NodeResult<Arc<[String]>> {
        let connection = &mut self.connection;
        self.names.fetch_or_compute(LIST_KEY, || {
            connection.send_data("list")?;
            let line = connection.read_line()?;
            Ok(split_names(&line))
        })
    }

    /// Lists the services of one host served by the node.
    pub fn list_node(&mut self, node: &str) -> NodeResult<Arc<[String]>> {
        validate_name(node)?;
        let key = format!("{}:{}", LIST_KEY, node);
        let connection = &mut self.connection;
        self.names.fetch_or_compute(&key, || {
            connection.send_data(&format!("list {}", node))?;
            let line = connection.read_line()?;
            Ok(split_names(&line))
        })
    }

    /// Lists the host names the node answers for.
    pub fn nodes(&mut self) -> NodeResult<Arc<[String]>> {
        let connection = &mut self.connection;
        self.names.fetch_or_compute(NODES_KEY, || {
            connection.send_data("nodes")?;
            let packet = connection.read_packet()?;
            Ok(packet
                .iter()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect())
        })
    }

    /// Fetches service configuration, omitting services the node reports as
    /// unknown or failed.
    pub fn config(&mut self, services: impl Into<Services>) -> NodeResult<Reply<Arc<ServiceConfig>>> {
        let services = services.into();
        let single = services.is_single();
        Ok(self.config_report(services)?.into_reply(single))
    }

    /// Fetches service configuration with every per-service outcome kept.
    ///
    /// Duplicate names are queried once. Reports are cached per service set,
    /// independent of the order the names were given in.
    pub fn config_report(&mut self, services: impl Into<Services>) -> NodeResult<ConfigReport> {
        let services = services.into();
        let names = dedup(services.names()?);
        let key = config_key(&names);
        let connection = &mut self.connection;
        let report = self.configs.fetch_or_compute(&key, || {
            let report = collect(connection, "config", &names, |lines| {
                parse_config(lines).map(Arc::new)
            })?;
            Ok::<_, NodeError>(Arc::new(report))
        })?;
        Ok(report.project(&names))
    }

    /// Fetches current values, omitting services the node reports as unknown
    /// or failed. Never cached.
    pub fn fetch(&mut self, services: impl Into<Services>) -> NodeResult<Reply<FetchValues>> {
        let services = services.into();
        let single = services.is_single();
        Ok(self.fetch_report(services)?.into_reply(single))
    }

    /// Fetches current values with every per-service outcome kept.
    pub fn fetch_report(&mut self, services: impl Into<Services>) -> NodeResult<ServiceReport<FetchValues>> {
        let services = services.into();
        let names = services.names()?;
        collect(&mut self.connection, "fetch", &names, parse_fetch::<String>)
    }

    /// Configuration of exactly one service; node-reported failures are errors.
    pub fn service_config(&mut self, service: &str) -> NodeResult<Arc<ServiceConfig>> {
        let report = self.config_report(service)?;
        match report.get(service) {
            Some(Ok(config)) => Ok(Arc::clone(config)),
            Some(Err(failure)) => Err(failure.into_error(service)),
            None => Err(NodeError::InvalidResponse(format!("no outcome for {}", service))),
        }
    }

    /// Values of exactly one service; node-reported failures are errors.
    pub fn service_values(&mut self, service: &str) -> NodeResult<FetchValues> {
        validate_name(service)?;
        query(&mut self.connection, "fetch", service, parse_fetch::<String>)?
            .map_err(|failure| failure.into_error(service))
    }
}

fn collect<T, F>(
    connection: &mut Connection,
    verb: &str,
    names: &[&str],
    parse: F,
) -> NodeResult<ServiceReport<T>>
where
    F: Fn(&[String]) -> NodeResult<T>,
{
    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let result = query(connection, verb, name, &parse)?;
        if let Err(failure) = &result {
            warn!(service = %name, verb, ?failure, "node reported service failure");
        }
        entries.push(ServiceOutcome {
            service: name.to_string(),
            result,
        });
    }
    Ok(ServiceReport { entries })
}

fn query<T, F>(
    connection: &mut Connection,
    verb: &str,
    service: &str,
    parse: F,
) -> NodeResult<Result<T, ServiceFailure>>
where
    F: Fn(&[String]) -> NodeResult<T>,
{
    debug!(service, verb, "querying service");
    connection.send_data(&format!("{} {}", verb, service))?;
    let lines = connection.read_packet()?;
    if let Some(failure) = packet_failure(&lines) {
        return Ok(Err(failure));
    }
    parse(lines.as_slice()).map(Ok)
}

fn parse_banner(line: &str) -> NodeResult<&str> {
    let invalid = || NodeError::InvalidResponse(format!("unexpected version banner: {:?}", line));
    if !line.trim_start().starts_with(BANNER_PREFIX) {
        return Err(invalid());
    }
    line.split_whitespace().last().ok_or_else(invalid)
}

fn split_names(line: &str) -> Arc<[String]> {
    line.split_whitespace().map(str::to_string).collect()
}

fn validate_name(name: &str) -> NodeResult<()> {
    if name.is_empty() {
        return Err(NodeError::InvalidArgument("empty service name".to_string()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NodeError::InvalidArgument(format!(
            "service name contains whitespace: {:?}",
            name
        )));
    }
    Ok(())
}

fn dedup(names: Vec<&str>) -> Vec<&str> {
    let mut unique: Vec<&str> = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

fn config_key(names: &[&str]) -> String {
    let mut sorted = names.to_vec();
    sorted.sort_unstable();
    format!("config:{}", sorted.join(" "))
}
