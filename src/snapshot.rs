//! Snapshot providers: where the relay list for a catalog comes from.
//!
//! # Overview
//!
//! - [`SnapshotProvider`]: the trait the retry coordinator pulls snapshots through
//! - [`StaticSnapshot`]: a fixed in-memory list
//! - [`SnapshotFile`]: relays loaded from a TOML list or a network-status document
//! - [`CachedSnapshot`]: wraps another provider with an on-disk pickle cache
//!
//! # Network-Status Format
//!
//! The text returned by `GETINFO ns/all` and found in cached consensus files:
//!
//! ```text
//! r nickname identity digest 2024-01-01 12:00:00 192.0.2.1 9001 0
//! s Fast Guard Running Stable Valid
//! w Bandwidth=5000 Measured=4800
//! p accept 80,443
//! family $AAAA... $BBBB...
//! ```
//!
//! `identity` is the base64 relay identity digest. Only `r`, `s`, `w`, `p` and
//! `family` lines are read; anything else is skipped.
//!
//! # Caching
//!
//! ```text
//!   cache file exists, younger than max_age, non-empty?
//!        │yes                      │no
//!        ▼                         ▼
//!   return cached nodes      inner.snapshot()
//!                                  │
//!                                  ▼
//!                         non-empty → write cache (atomic, 0600)
//! ```
//!
//! A corrupt cache is logged and refetched, never returned.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use stem_rs::descriptor::router_status::{RouterStatusEntry, RouterStatusEntryType};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::node::{Fingerprint, Node};

/// Source of relay snapshots.
pub trait SnapshotProvider {
    /// Returns the current relay list. An empty list is a valid snapshot.
    fn snapshot(&mut self) -> Result<Vec<Node>>;
}

impl<P: SnapshotProvider + ?Sized> SnapshotProvider for Box<P> {
    fn snapshot(&mut self) -> Result<Vec<Node>> {
        (**self).snapshot()
    }
}

/// A fixed relay list, returned unchanged on every call.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot {
    nodes: Vec<Node>,
}

impl StaticSnapshot {
    /// Wraps a relay list.
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

impl SnapshotProvider for StaticSnapshot {
    fn snapshot(&mut self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }
}

/// On-disk snapshot formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotFormat {
    /// Pick by file extension: `.toml` is TOML, anything else network status.
    #[default]
    Auto,
    /// `[[node]]` tables.
    Toml,
    /// `r`/`s`/`w` network-status lines.
    NetworkStatus,
}

impl std::str::FromStr for SnapshotFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SnapshotFormat::Auto),
            "toml" => Ok(SnapshotFormat::Toml),
            "network-status" | "ns" | "consensus" => Ok(SnapshotFormat::NetworkStatus),
            _ => Err(Error::Config(format!("invalid snapshot format: {}", s))),
        }
    }
}

impl SnapshotFormat {
    fn resolve(self, path: &Path) -> SnapshotFormat {
        match self {
            SnapshotFormat::Auto => {
                if path.extension().is_some_and(|ext| ext == "toml") {
                    SnapshotFormat::Toml
                } else {
                    SnapshotFormat::NetworkStatus
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TomlSnapshot {
    #[serde(default, rename = "node")]
    nodes: Vec<Node>,
}

/// Relays read from a file on every call.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    format: SnapshotFormat,
}

impl SnapshotFile {
    /// Creates a provider for `path` in the given format.
    pub fn new(path: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// The file this provider reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotProvider for SnapshotFile {
    fn snapshot(&mut self) -> Result<Vec<Node>> {
        let content = std::fs::read_to_string(&self.path)?;
        let nodes = match self.format.resolve(&self.path) {
            SnapshotFormat::Toml => parse_toml_snapshot(&content)?,
            _ => parse_network_status(&content),
        };
        info!(
            "Loaded {} relays from {}",
            nodes.len(),
            self.path.display()
        );
        Ok(nodes)
    }
}

/// Parses a TOML snapshot made of `[[node]]` tables.
///
/// # Errors
///
/// Returns [`Error::Snapshot`] if the document is not valid TOML or a node has
/// no valid fingerprint.
pub fn parse_toml_snapshot(content: &str) -> Result<Vec<Node>> {
    let doc: TomlSnapshot =
        toml::from_str(content).map_err(|e| Error::Snapshot(e.to_string()))?;
    Ok(doc.nodes)
}

struct PendingRouter {
    router: RouterStatusEntry,
    published: Option<DateTime<Utc>>,
    exit_policy_allows: Option<bool>,
    family: Vec<Fingerprint>,
}

impl PendingRouter {
    fn into_node(self) -> Option<Node> {
        match Node::try_from(&self.router) {
            Ok(mut node) => {
                node.published = self.published;
                node.exit_policy_allows = self.exit_policy_allows;
                node.family = self.family.into_iter().collect();
                Some(node)
            }
            Err(e) => {
                debug!("Skipping router {}: {}", self.router.nickname, e);
                None
            }
        }
    }
}

/// Parses network-status text into nodes.
///
/// Malformed router entries are skipped rather than failing the whole
/// document, so a partially corrupt snapshot still yields its good entries.
pub fn parse_network_status(response: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut current: Option<PendingRouter> = None;

    for line in response.lines() {
        if let Some(stripped) = line.strip_prefix("r ") {
            if let Some(node) = current.take().and_then(PendingRouter::into_node) {
                nodes.push(node);
            }
            current = parse_r_line(stripped);
        } else if let Some(stripped) = line.strip_prefix("s ") {
            if let Some(ref mut pending) = current {
                pending.router.flags = stripped.split_whitespace().map(|s| s.to_string()).collect();
            }
        } else if let Some(stripped) = line.strip_prefix("w ") {
            if let Some(ref mut pending) = current {
                for part in stripped.split_whitespace() {
                    if let Some((key, value)) = part.split_once('=') {
                        if let Ok(v) = value.parse::<u64>() {
                            match key {
                                "Bandwidth" => pending.router.bandwidth = Some(v),
                                "Measured" => pending.router.measured = Some(v),
                                _ => {}
                            }
                        }
                    }
                }
            }
        } else if let Some(stripped) = line.strip_prefix("p ") {
            if let Some(ref mut pending) = current {
                pending.exit_policy_allows = exit_summary_allows(stripped);
            }
        } else if let Some(stripped) = line.strip_prefix("family ") {
            if let Some(ref mut pending) = current {
                pending.family = stripped
                    .split_whitespace()
                    .filter_map(|member| Fingerprint::parse(member).ok())
                    .collect();
            }
        }
    }

    if let Some(node) = current.and_then(PendingRouter::into_node) {
        nodes.push(node);
    }

    nodes
}

/// Parses the fields after `r `: nickname identity digest date time IP ORPort DirPort.
fn parse_r_line(fields: &str) -> Option<PendingRouter> {
    let parts: Vec<&str> = fields.split_whitespace().collect();
    if parts.len() < 7 {
        debug!("Skipping short router line: {}", fields);
        return None;
    }

    let nickname = parts[0].to_string();
    let fingerprint = decode_base64_fingerprint(parts[1]);
    let published =
        NaiveDateTime::parse_from_str(&format!("{} {}", parts[3], parts[4]), "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|t| t.and_utc());
    let Ok(address) = parts[5].parse::<IpAddr>() else {
        debug!("Skipping router {} with address {}", nickname, parts[5]);
        return None;
    };
    let or_port = parts[6].parse().unwrap_or(0);

    let router = RouterStatusEntry::new(
        RouterStatusEntryType::V3,
        nickname,
        fingerprint,
        published.unwrap_or_else(Utc::now),
        address,
        or_port,
    );

    Some(PendingRouter {
        router,
        published,
        exit_policy_allows: None,
        family: Vec::new(),
    })
}

/// Interprets a microdescriptor exit policy summary (`accept 80,443` or
/// `reject 1-65535`). Returns `None` if the line is not a summary.
fn exit_summary_allows(summary: &str) -> Option<bool> {
    let (action, ports) = summary.trim().split_once(' ')?;
    let ports = ports.trim();
    match action {
        "accept" => Some(!ports.is_empty()),
        "reject" => Some(ports != "1-65535"),
        _ => None,
    }
}

/// Decodes a base64-encoded identity digest to upper-case hex.
fn decode_base64_fingerprint(b64: &str) -> String {
    base64_decode(b64)
        .unwrap_or_default()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect()
}

fn base64_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let input = input.trim_end_matches('=');
    let mut output = Vec::with_capacity(input.len() * 3 / 4);
    let mut buffer = 0u32;
    let mut bits = 0;

    for c in input.bytes() {
        let value = ALPHABET.iter().position(|&x| x == c)? as u32;
        buffer = (buffer << 6) | value;
        bits += 6;

        if bits >= 8 {
            bits -= 8;
            output.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Some(output)
}

/// Wraps a provider with an on-disk cache valid for `max_age`.
pub struct CachedSnapshot<P> {
    inner: P,
    cache_path: PathBuf,
    max_age: Duration,
}

impl<P: SnapshotProvider> CachedSnapshot<P> {
    /// Creates a caching wrapper around `inner`.
    pub fn new(inner: P, cache_path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            inner,
            cache_path: cache_path.into(),
            max_age,
        }
    }

    /// Returns the cached nodes if the cache is fresh and non-empty.
    fn read_fresh_cache(&self) -> Option<Vec<Node>> {
        let age = std::fs::metadata(&self.cache_path)
            .and_then(|m| m.modified())
            .ok()?
            .elapsed()
            .unwrap_or_default();
        if age >= self.max_age {
            debug!("Snapshot cache is {}s old, refreshing", age.as_secs());
            return None;
        }

        match read_cache(&self.cache_path) {
            Ok(nodes) if !nodes.is_empty() => {
                info!("Loaded {} relays from cache", nodes.len());
                Some(nodes)
            }
            Ok(_) => {
                warn!("Snapshot cache was empty, fetching fresh snapshot");
                None
            }
            Err(e) => {
                warn!("{}; fetching fresh snapshot", e);
                None
            }
        }
    }
}

impl<P: SnapshotProvider> SnapshotProvider for CachedSnapshot<P> {
    fn snapshot(&mut self) -> Result<Vec<Node>> {
        if let Some(nodes) = self.read_fresh_cache() {
            return Ok(nodes);
        }

        let nodes = self.inner.snapshot()?;
        if !nodes.is_empty() {
            if let Err(e) = write_cache(&self.cache_path, &nodes) {
                warn!("Cannot write snapshot cache: {}", e);
            }
        }
        Ok(nodes)
    }
}

/// Reads a pickled node list.
///
/// # Errors
///
/// Returns [`Error::Cache`] if the file cannot be opened or decoded.
pub fn read_cache(path: &Path) -> Result<Vec<Node>> {
    let file =
        File::open(path).map_err(|e| Error::Cache(format!("cannot open cache file: {}", e)))?;
    serde_pickle::from_reader(BufReader::new(file), Default::default())
        .map_err(|e| Error::Cache(format!("cannot parse cache file: {}", e)))
}

/// Writes a pickled node list atomically with owner-only permissions.
///
/// # Errors
///
/// Returns [`Error::Cache`] if the file cannot be written.
pub fn write_cache(path: &Path, nodes: &[Node]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    #[cfg(unix)]
    let file = {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .map_err(|e| Error::Cache(format!("cannot create temp cache file: {}", e)))?
    };

    #[cfg(not(unix))]
    let file = File::create(&temp_path)
        .map_err(|e| Error::Cache(format!("cannot create temp cache file: {}", e)))?;

    let mut writer = BufWriter::new(file);
    serde_pickle::to_writer(&mut writer, &nodes, Default::default())
        .map_err(|e| Error::Cache(format!("cannot write cache file: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Cache(format!("cannot flush cache file: {}", e)))?;
    drop(writer);

    std::fs::rename(&temp_path, path)
        .map_err(|e| Error::Cache(format!("cannot rename temp cache file: {}", e)))?;

    Ok(())
}
