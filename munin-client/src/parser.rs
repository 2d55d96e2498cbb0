//! # Reply Parsers
//!
//! Purpose: Turn packet lines into `ServiceConfig` and `FetchValues` records.
//! All functions here are pure.
//!
//! ## Grammar
//!
//! ```text
//! config:  # comment
//!          graph_title Load average        -> graph["graph_title"]
//!          load.label load                 -> fields["load"]["label"]
//!          graph_scale                     -> graph["graph_scale"] = ""
//! fetch:   load.value 0.42                 -> values["load"] = "0.42"
//! ```
//!
//! A trailing blank line or a stray `.` sentinel is ignored; any other line
//! that does not fit the grammar is a protocol error.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{NodeError, NodeResult, ServiceFailure};
use crate::framing::PACKET_SENTINEL;

const UNKNOWN_SERVICE_PREFIX: &str = "# Unknown service";
const BAD_EXIT_PREFIX: &str = "# Bad exit";
const VALUE_SUFFIX: &str = ".value";
const GRAPH_ARGS: &str = "graph_args";

/// Value nodes report for a field they could not sample.
pub const UNKNOWN_VALUE: &str = "U";

/// Configuration of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    /// Undotted directives, keyed by their full name (`graph_title`).
    pub graph: BTreeMap<String, String>,
    /// Dotted directives: field name -> attribute -> value.
    pub fields: BTreeMap<String, BTreeMap<String, String>>,
}

impl ServiceConfig {
    /// Looks up an undotted directive.
    pub fn graph(&self, key: &str) -> Option<&str> {
        self.graph.get(key).map(String::as_str)
    }

    /// Shorthand for `graph_title`.
    pub fn title(&self) -> Option<&str> {
        self.graph("graph_title")
    }

    /// Attributes declared for a field.
    pub fn field(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.fields.get(name)
    }

    /// Looks up one attribute of one field.
    pub fn field_attr(&self, field: &str, attr: &str) -> Option<&str> {
        self.fields.get(field)?.get(attr).map(String::as_str)
    }

    /// Structured view of `graph_args`, when present.
    pub fn graph_args(&self) -> Option<GraphArgs> {
        self.graph(GRAPH_ARGS).map(parse_graph_args)
    }
}

/// Parsed form of a `graph_args` directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphArgs {
    /// Directive value as sent.
    pub raw: String,
    /// Numeric options (`--base 1000`, `-l 0`), dashes stripped.
    pub parsed: BTreeMap<String, u64>,
}

/// Current values of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FetchValues {
    /// Field name -> raw value.
    pub values: BTreeMap<String, String>,
}

impl FetchValues {
    /// Raw value of a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Numeric value of a field; `None` when missing, `U`, or not a number.
    pub fn as_f64(&self, field: &str) -> Option<f64> {
        self.get(field)
            .filter(|value| *value != UNKNOWN_VALUE)
            .and_then(|value| value.parse().ok())
    }

    /// True when the node reported the field as unavailable.
    pub fn is_unknown(&self, field: &str) -> bool {
        self.get(field) == Some(UNKNOWN_VALUE)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Detects a packet the node used to report a service failure.
pub fn packet_failure(lines: &[String]) -> Option<ServiceFailure> {
    let first = lines.first()?.trim_start();
    if first.starts_with(UNKNOWN_SERVICE_PREFIX) {
        Some(ServiceFailure::UnknownService)
    } else if first.starts_with(BAD_EXIT_PREFIX) {
        Some(ServiceFailure::BadExit)
    } else {
        None
    }
}

/// Parses a `config <service>` packet. Later duplicates win.
pub fn parse_config<S: AsRef<str>>(lines: &[S]) -> NodeResult<ServiceConfig> {
    let mut config = ServiceConfig::default();
    for line in content_lines(lines) {
        let line = line.trim();
        if line.is_empty() {
            return Err(NodeError::Protocol("blank line inside config reply".to_string()));
        }
        if line.starts_with('#') {
            continue;
        }

        let (key, value) = split_directive(line);
        match key.split_once('.') {
            Some((field, attr)) => {
                if field.is_empty() || attr.is_empty() {
                    return Err(NodeError::Protocol(format!("malformed config key: {:?}", line)));
                }
                config
                    .fields
                    .entry(field.to_string())
                    .or_default()
                    .insert(attr.to_string(), value.to_string());
            }
            None => {
                config.graph.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(config)
}

/// Parses a `fetch <service>` packet.
pub fn parse_fetch<S: AsRef<str>>(lines: &[S]) -> NodeResult<FetchValues> {
    let mut values = FetchValues::default();
    for line in content_lines(lines) {
        let line = line.trim();
        let (key, value) = split_directive(line);
        let field = key
            .strip_suffix(VALUE_SUFFIX)
            .filter(|field| !field.is_empty());
        match field {
            Some(field) if !value.is_empty() => {
                values.values.insert(field.to_string(), value.to_string());
            }
            _ => {
                return Err(NodeError::Protocol(format!("malformed fetch line: {:?}", line)));
            }
        }
    }
    Ok(values)
}

/// Parses `graph_args`: each `-x N` / `--name N` pair with an integer
/// argument becomes an entry; everything else only survives in `raw`.
pub fn parse_graph_args(raw: &str) -> GraphArgs {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let mut parsed = BTreeMap::new();
    for pair in tokens.windows(2) {
        let name = pair[0].trim_start_matches('-');
        if name.len() == pair[0].len() || name.is_empty() {
            continue;
        }
        if let Ok(value) = pair[1].parse::<u64>() {
            parsed.insert(name.to_string(), value);
        }
    }
    GraphArgs {
        raw: raw.to_string(),
        parsed,
    }
}

fn content_lines<S: AsRef<str>>(lines: &[S]) -> impl Iterator<Item = &str> {
    let mut end = lines.len();
    while end > 0 {
        let last = lines[end - 1].as_ref().trim();
        if last.is_empty() || last == PACKET_SENTINEL {
            end -= 1;
        } else {
            break;
        }
    }
    lines[..end].iter().map(|line| line.as_ref())
}

fn split_directive(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((key, value)) => (key, value.trim()),
        None => (line, ""),
    }
}
