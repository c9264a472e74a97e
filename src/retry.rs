//! Bounded retry around path construction and circuit establishment.
//!
//! # Attempt Loop
//!
//! ```text
//!   attempt n = 1..=max_attempts
//!        │
//!        ▼
//!   catalog (every attempt, or fetched once)   ── error ──┐
//!        │                                                │
//!        ▼                                                │
//!   build_path                                 ── error ──┤
//!        │                                                │
//!        ▼                                                │
//!   log hops, warn on stale descriptors                   │
//!        │                                                │
//!        ▼                                                │
//!   establish(path) under timeout              ── error ──┤
//!        │                                                ▼
//!        ▼                                    sleep (unless last), n += 1
//!   Ok(Established)
//! ```
//!
//! Every failed attempt starts over from a freshly built path. When the
//! budget runs out the last error is returned inside [`Error::Exhausted`].

use std::future::Future;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{CatalogRefresh, PathConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::node::Catalog;
use crate::path::{Path, PathBuilder};
use crate::snapshot::SnapshotProvider;

/// Opaque identifier returned by a circuit establisher.
pub type CircuitHandle = String;

/// Collaborator that turns a path into a live circuit.
pub trait CircuitEstablisher {
    /// Attempts to establish a circuit over `path`.
    ///
    /// Failures should be reported as [`Error::Establish`].
    fn establish(&mut self, path: &Path) -> impl Future<Output = Result<CircuitHandle>>;
}

/// A successfully established circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Established {
    /// Handle returned by the establisher.
    pub handle: CircuitHandle,
    /// Path the circuit was built over.
    pub path: Path,
    /// Attempts used, counting the successful one.
    pub attempts: u32,
}

/// Drives path building and establishment within a retry budget.
pub struct RetryCoordinator<R = StdRng> {
    builder: PathBuilder<R>,
    config: RetryConfig,
}

impl RetryCoordinator<StdRng> {
    /// Creates a coordinator with an entropy-seeded path builder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails [`RetryConfig::validate`].
    pub fn new(path_config: PathConfig, config: RetryConfig) -> Result<Self> {
        Self::with_builder(PathBuilder::new(path_config), config)
    }
}

impl<R: Rng> RetryCoordinator<R> {
    /// Creates a coordinator around an existing builder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails [`RetryConfig::validate`].
    pub fn with_builder(builder: PathBuilder<R>, config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { builder, config })
    }

    /// Retry settings in use.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The path builder driven by this coordinator.
    pub fn builder(&self) -> &PathBuilder<R> {
        &self.builder
    }

    /// Builds and establishes a circuit, retrying up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] carrying the last failure once every
    /// attempt has failed.
    pub async fn establish<P, E>(
        &mut self,
        provider: &mut P,
        hop_count: usize,
        establisher: &mut E,
    ) -> Result<Established>
    where
        P: SnapshotProvider + ?Sized,
        E: CircuitEstablisher,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut reused: Option<Catalog> = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            info!("Path attempt {}/{}", attempt, max_attempts);

            match self.attempt(provider, &mut reused, hop_count, establisher).await {
                Ok((handle, path)) => {
                    info!("Circuit established on attempt {}: {}", attempt, handle);
                    return Ok(Established {
                        handle,
                        path,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.config.delay_after(attempt)?;
                if !delay.is_zero() {
                    debug!("Retrying in {:.1}s", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(Error::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt<P, E>(
        &mut self,
        provider: &mut P,
        reused: &mut Option<Catalog>,
        hop_count: usize,
        establisher: &mut E,
    ) -> Result<(CircuitHandle, Path)>
    where
        P: SnapshotProvider + ?Sized,
        E: CircuitEstablisher,
    {
        let fresh;
        let catalog = match self.config.catalog_refresh {
            CatalogRefresh::EveryAttempt => {
                fresh = Catalog::new(provider.snapshot()?);
                &fresh
            }
            CatalogRefresh::Reuse => match reused {
                Some(catalog) => &*catalog,
                None => &*reused.insert(Catalog::new(provider.snapshot()?)),
            },
        };

        let path = self.builder.build_path(catalog, hop_count)?;
        if self.builder.last_build_relaxed() {
            warn!("Path built without full diversity");
        }
        self.log_hops(catalog, &path);

        let timeout = self.config.establish_timeout()?;
        let handle = match tokio::time::timeout(timeout, establisher.establish(&path)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(Error::Establish(msg))) => return Err(Error::Establish(msg)),
            Ok(Err(e)) => return Err(Error::Establish(e.to_string())),
            Err(_) => {
                return Err(Error::Establish(format!(
                    "timed out after {:.1}s",
                    timeout.as_secs_f64()
                )))
            }
        };

        Ok((handle, path))
    }

    fn log_hops(&self, catalog: &Catalog, path: &Path) {
        let stale_after = chrono::Duration::hours(i64::from(self.config.stale_after_hours));
        let now = Utc::now();

        for (i, node) in catalog.resolve(path.fingerprints()).iter().enumerate() {
            info!("Hop {}: {}", i + 1, node.describe());
            if let Some(published) = node.published {
                if now - published > stale_after {
                    warn!(
                        "Hop {} descriptor is stale (published {})",
                        i + 1,
                        published.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }
}
