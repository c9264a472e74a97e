//! # relaypath
//!
//! Bandwidth-weighted, diversity-constrained relay path selection for custom
//! Tor circuits.
//!
//! # Overview
//!
//! Given a snapshot of relays, relaypath builds a path of N hops:
//!
//! - **Classification** ([`classify`]): split relays into entry, middle and exit pools
//! - **Weighted selection** ([`node_selection`]): bandwidth-proportional draws
//! - **Diversity** ([`diversity`]): no two hops in the same family or IPv4 /16
//! - **Path building** ([`path`]): entry, middles, exit, with graceful fallback
//! - **Retry** ([`retry`]): rebuild and re-establish within a bounded budget
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`node`] | [`Node`], [`Fingerprint`] and the snapshot [`Catalog`] |
//! | [`classify`] | Role pools and fallback promotion |
//! | [`node_selection`] | Restrictions and weighted selection |
//! | [`diversity`] | Family and subnet predicates |
//! | [`path`] | [`Path`] and [`PathBuilder`] |
//! | [`retry`] | [`RetryCoordinator`] and the [`CircuitEstablisher`] trait |
//! | [`snapshot`] | Snapshot providers: files, network status, pickle cache |
//! | [`config`] | Configuration management (TOML, CLI, environment) |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`logger`] | Logging infrastructure using tracing |
//!
//! # What This Library Does NOT Do
//!
//! - **Talk to Tor**: establishing circuits is up to a [`CircuitEstablisher`]
//!   implementation, e.g. one using [`stem_rs::controller::Controller`]
//! - **Fetch consensus documents**: snapshots come from a [`SnapshotProvider`]
//! - **Persist guards**: every path is drawn fresh
//!
//! # Quick Start
//!
//! ```rust
//! use relaypath::{Catalog, Node, PathBuilder, PathConfig, Fingerprint};
//!
//! let nodes: Vec<Node> = (0..9u32)
//!     .map(|i| {
//!         let mut n = Node::new(Fingerprint::parse(&format!("{:040X}", i)).unwrap());
//!         n.address = format!("10.{}.0.1", i);
//!         n.bandwidth = 1000.0;
//!         n.flags = match i % 3 {
//!             0 => vec!["Guard".into(), "Fast".into(), "Stable".into()],
//!             1 => vec!["Exit".into()],
//!             _ => vec![],
//!         };
//!         n
//!     })
//!     .collect();
//!
//! let catalog = Catalog::new(nodes);
//! let path = PathBuilder::new(PathConfig::default()).build_path(&catalog, 3)?;
//! println!("{}", path);
//! # Ok::<(), relaypath::Error>(())
//! ```
//!
//! # Configuration
//!
//! ```text
//! ┌─────────────────┐
//! │   CLI Arguments │ ◄── Highest priority (overrides all)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Environment   │ ◄── RELAYPATH_CONFIG, RELAYPATH_SNAPSHOT
//! │    Variables    │
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Config File   │ ◄── TOML file (default: relaypath.conf)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │    Defaults     │
//! └─────────────────┘
//! ```
//!
//! See [`Config`] for all available options.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod classify;
pub mod config;
pub mod diversity;
pub mod error;
pub mod logger;
pub mod node;
pub mod node_selection;
pub mod path;
pub mod retry;
pub mod snapshot;

pub use classify::{classify, RolePools};
pub use config::{
    Backoff, CatalogRefresh, CliArgs, Config, LogLevel, PathConfig, RetryConfig,
};
pub use diversity::{is_eligible, same_coarse_location, same_family, DiversityRestriction};
pub use error::{Error, Result};
pub use node::{Catalog, Fingerprint, Node};
pub use node_selection::{
    is_valid_fingerprint, select_uniform, select_weighted, FlagsRestriction, NodeRestriction,
};
pub use path::{Path, PathBuilder, DEFAULT_HOP_COUNT, MIN_HOP_COUNT};
pub use retry::{CircuitEstablisher, CircuitHandle, Established, RetryCoordinator};
pub use snapshot::{
    CachedSnapshot, SnapshotFile, SnapshotFormat, SnapshotProvider, StaticSnapshot,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
