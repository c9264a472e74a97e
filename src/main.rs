//! relaypath-rs CLI application entry point.
//!
//! Loads a relay snapshot, classifies it and builds a path through the retry
//! coordinator. Circuits are not actually established: the binary uses a
//! dry-run establisher that accepts every path.
//!
//! # Startup Flow
//!
//! ```text
//!   ┌─────────────────┐
//!   │  Parse CLI Args │
//!   └────────┬────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐       ┌─────────────────┐
//!   │ --generate_config│────▶ │ Write default   │────▶ Exit
//!   │    specified?    │       │ config & exit   │
//!   └────────┬─────────┘       └─────────────────┘
//!            │ No
//!            ▼
//!   ┌─────────────────┐
//!   │  Load Config    │ ◄── Defaults → File → Env → CLI
//!   └────────┬────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐
//!   │ Snapshot source │ ◄── file, optionally behind the pickle cache
//!   └────────┬────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐       ┌─────────────────┐
//!   │ --classify-only?│────▶ │ Print pool sizes│────▶ Exit
//!   └────────┬────────┘       └─────────────────┘
//!            │ No
//!            ▼
//!   ┌─────────────────┐
//!   │ Retry coordinator│ ◄── build, log hops, dry-run establish
//!   └─────────────────┘
//! ```
//!
//! # Usage Examples
//!
//! ```bash
//! # Build a 4-hop path from a cached consensus
//! relaypath-rs --snapshot /var/lib/tor/cached-consensus
//!
//! # Three hops from a TOML relay list, cached for an hour
//! relaypath-rs --snapshot relays.toml --cache relays.cache --hops 3
//!
//! # Only show how the snapshot classifies
//! relaypath-rs --snapshot relays.toml --classify-only
//!
//! # Generate default configuration file
//! relaypath-rs --generate_config relaypath.conf
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Error (see stderr for details) |

use clap::Parser;
use std::process::ExitCode;

use relaypath::{
    config, logger, plog_fmt, CachedSnapshot, Catalog, CircuitEstablisher, CircuitHandle,
    CliArgs, Config, Error, LogLevel, Path, RetryCoordinator, SnapshotFile, SnapshotProvider,
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Accepts every path and hands back a synthetic handle.
struct DryRunEstablisher {
    next_id: u32,
}

impl CircuitEstablisher for DryRunEstablisher {
    async fn establish(&mut self, path: &Path) -> relaypath::Result<CircuitHandle> {
        self.next_id += 1;
        logger::plog(LogLevel::Debug, &format!("Dry run: EXTENDCIRCUIT 0 {}", path));
        Ok(format!("dry-run-{}", self.next_id))
    }
}

fn snapshot_provider(config: &Config) -> relaypath::Result<Box<dyn SnapshotProvider>> {
    let snapshot_file = config.snapshot_file.as_ref().ok_or_else(|| {
        Error::Config("no snapshot file given (use --snapshot or snapshot_file)".to_string())
    })?;
    let file = SnapshotFile::new(snapshot_file, config.snapshot_format);

    Ok(match config.cache_file {
        Some(ref cache_file) => Box::new(CachedSnapshot::new(
            file,
            cache_file,
            config.cache_max_age(),
        )),
        None => Box::new(file),
    })
}

async fn run() -> relaypath::Result<()> {
    let args = CliArgs::parse();

    if let Some(ref output_path) = args.generate_config {
        let config = Config::default();
        let toml = config.to_toml()?;
        std::fs::write(output_path, toml)?;
        println!("Wrote default config to {}", output_path.display());
        return Ok(());
    }

    let config = config::load_config(&args)?;
    logger::init(config.loglevel, config.logfile.as_deref())?;

    plog_fmt!(LogLevel::Notice, "relaypath-rs {} starting", relaypath::VERSION);
    plog_fmt!(
        LogLevel::Debug,
        "Hops: {}, max attempts: {}",
        config.path.hop_count,
        config.retry.max_attempts
    );

    let mut provider = snapshot_provider(&config)?;

    if args.classify_only {
        let catalog = Catalog::new(provider.snapshot()?);
        let pools = catalog.classify();
        println!("Relays: {}", catalog.len());
        println!(
            "Entry: {}{}",
            pools.entry.len(),
            if pools.entry_promoted { " (promoted)" } else { "" }
        );
        println!("Middle: {}", pools.middle.len());
        println!(
            "Exit: {}{}",
            pools.exit.len(),
            if pools.exit_promoted { " (promoted)" } else { "" }
        );
        return Ok(());
    }

    let mut coordinator = RetryCoordinator::new(config.path.clone(), config.retry.clone())?;
    let mut establisher = DryRunEstablisher { next_id: 0 };

    let established = coordinator
        .establish(&mut provider, config.path.hop_count, &mut establisher)
        .await
        .inspect_err(|e| logger::plog(LogLevel::Error, &e.to_string()))?;

    plog_fmt!(
        LogLevel::Notice,
        "Path ready after {} attempt(s): {}",
        established.attempts,
        established.handle
    );
    for (i, fingerprint) in established.path.fingerprints().iter().enumerate() {
        println!("{} ${}", i + 1, fingerprint);
    }

    Ok(())
}
