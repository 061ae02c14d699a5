use crate::config::PROGRESS_INTERVAL;
use crate::lookup::LookupTables;
use crate::parser::{open_dump, parse_system_line};
use crate::partition::{StripedLines, WorkUnit};
use crate::registry::NameRegistry;
use crate::report::{self, WorkerReport};
use crate::stats::TransformStats;
use crate::store;
use crate::transform::{transform_system, TransformContext};
use crate::writer::PartialResultWriter;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything one worker needs to process its stripe of the dump.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub dump: PathBuf,
    pub db: PathBuf,
    pub registry_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub unit: WorkUnit,
    pub include_market: bool,
}

/// Entry point of a worker process: loads its own lookups and registry snapshot.
pub fn run_worker(config: &WorkerConfig) -> Result<WorkerReport> {
    let lookups = {
        let conn = store::open(&config.db)?;
        LookupTables::load(&conn)?
    };
    let registry = NameRegistry::load(&config.registry_dir)?;
    run_worker_with(config, &registry, &lookups)
}

/// Transforms every line owned by `config.unit` and writes the partial results.
///
/// Bad lines and unregistered systems are logged and counted, never fatal. Only I/O
/// failures on the dump or the output files abort the worker.
pub fn run_worker_with(
    config: &WorkerConfig,
    registry: &NameRegistry,
    lookups: &LookupTables,
) -> Result<WorkerReport> {
    let start = Instant::now();
    let worker = config.unit.worker_id;
    let ctx = TransformContext {
        registry,
        lookups,
        include_market: config.include_market,
        fallback_time: Utc::now().timestamp(),
    };

    let stats = TransformStats::new();
    let mut writer = PartialResultWriter::create(&config.scratch_dir, config.unit)?;
    let reader = open_dump(&config.dump)?;
    let mut lines = StripedLines::new(reader, config.unit);

    info!(
        worker,
        total = config.unit.total_workers,
        "Worker started"
    );

    for line in lines.by_ref() {
        let line = line.with_context(|| format!("Failed to read dump: {:?}", config.dump))?;
        stats.inc_lines();

        match parse_system_line(&line.bytes) {
            Ok(Some(raw)) => match transform_system(&raw, &ctx) {
                Ok(result) => {
                    for skip in &result.skipped {
                        debug!(worker, line = line.index, reason = ?skip.reason, name = %skip.name, "Dropped nested item");
                    }
                    stats.record(&result);
                    writer.write_result(&result)?;
                }
                Err(e) => {
                    stats.inc_missing_ids();
                    error!(worker, line = line.index, error = %e, "Dropping system");
                }
            },
            Ok(None) => {}
            Err(e) => {
                stats.inc_malformed();
                warn!(worker, line = line.index, error = %e, "Skipping malformed dump line");
            }
        }

        if stats.lines() % PROGRESS_INTERVAL == 0 {
            info!(
                worker,
                lines = stats.lines(),
                systems = stats.systems(),
                "Worker progress"
            );
        }
    }

    let rows = writer.finish()?;
    let report = WorkerReport::new(&config.dump, config.unit, stats.to_counts(), rows)?;
    report::save(&config.scratch_dir, &report)?;

    info!(
        worker,
        lines_seen = lines.lines_seen(),
        systems = report.counts.systems,
        malformed = report.counts.malformed_lines,
        missing_ids = report.counts.missing_ids,
        duration_secs = start.elapsed().as_secs_f64(),
        "Worker finished"
    );
    Ok(report)
}
