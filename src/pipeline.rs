//! Orchestrator: registry maintenance, worker fan-out, barrier, merge, load and cleanup.

use crate::cache;
use crate::catalog::CatalogSummary;
use crate::extract::{self, WorkerConfig};
use crate::import::{self, LOAD_ORDER};
use crate::lookup::LookupTables;
use crate::merge::{self, MergeSummary};
use crate::overrides::{self, Overrides};
use crate::partition::WorkUnit;
use crate::registry::{self, NameRegistry, ReconcileSummary};
use crate::report::{self, WorkerReport};
use crate::stats::TransformCounts;
use crate::store;
use crate::writer::cleanup_scratch_files;
use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use rayon::prelude::*;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};

/// How worker units are executed.
#[derive(Debug, Clone)]
pub enum Launcher {
    /// One child process per unit, re-invoking `exe` with the hidden `worker` subcommand.
    Processes { exe: PathBuf, verbosity: u8 },
    /// One rayon task per unit inside this process, sharing one registry snapshot.
    Threads,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dump: PathBuf,
    pub db: PathBuf,
    pub registry_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub jobs: usize,
    pub refresh_ids: bool,
    pub refresh_caches: bool,
    pub include_market: bool,
    pub recreate_tables: bool,
    pub skip_load: bool,
    pub cleanup: bool,
    pub seed_registry: bool,
    pub launcher: Launcher,
}

impl PipelineConfig {
    fn worker_config(&self, unit: WorkUnit) -> WorkerConfig {
        WorkerConfig {
            dump: self.dump.clone(),
            db: self.db.clone(),
            registry_dir: self.registry_dir.clone(),
            scratch_dir: self.scratch_dir.clone(),
            unit,
            include_market: self.include_market,
        }
    }
}

#[derive(Debug, Default)]
pub struct PhaseTimes {
    pub maintenance: Duration,
    pub transform: Duration,
    pub merge: Duration,
    pub load: Duration,
}

#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub registry: Vec<ReconcileSummary>,
    pub seeded: Vec<ReconcileSummary>,
    pub catalog: Option<CatalogSummary>,
    pub workers: usize,
    pub counts: TransformCounts,
    pub merge: Option<MergeSummary>,
    pub loaded: Vec<(&'static str, u64)>,
    pub overridden: usize,
    pub scratch_removed: usize,
    pub times: PhaseTimes,
}

/// Runs one import. Scratch files are removed afterwards whether or not the run succeeded.
pub fn run(config: &PipelineConfig) -> Result<PipelineSummary> {
    if config.jobs == 0 {
        bail!("At least one worker is required");
    }
    fs::create_dir_all(&config.scratch_dir).with_context(|| {
        format!("Failed to create scratch directory: {:?}", config.scratch_dir)
    })?;

    let mut summary = PipelineSummary::default();
    let result = run_phases(config, &mut summary);

    if config.cleanup {
        match cleanup_scratch_files(&config.scratch_dir) {
            Ok(removed) => summary.scratch_removed = removed,
            Err(e) => warn!(error = %e, "Failed to clean up scratch files"),
        }
    }

    result.map(|()| summary)
}

fn run_phases(config: &PipelineConfig, summary: &mut PipelineSummary) -> Result<()> {
    let mut conn = store::open(&config.db)?;
    if config.recreate_tables {
        store::recreate_tables(&conn)?;
    } else {
        store::create_tables(&conn)?;
    }
    store::preload_reference_tables(&conn)?;

    let start = Instant::now();
    maintain_reference_data(config, &mut conn, summary)?;
    summary.times.maintenance = start.elapsed();

    if config.skip_load {
        info!("Skipping parse and load");
        return Ok(());
    }

    // Resolved up front so a bad overrides file fails before any worker runs
    let lookups = LookupTables::load(&conn)?;
    let corrections = Overrides::load(&config.registry_dir)?.resolve(&lookups)?;

    let start = Instant::now();
    let reports = launch_workers(config)?;
    for report in &reports {
        summary.counts.merge(&report.counts);
    }
    summary.workers = reports.len();
    summary.times.transform = start.elapsed();
    info!(
        workers = reports.len(),
        systems = summary.counts.systems,
        duration_secs = summary.times.transform.as_secs_f64(),
        "All workers finished"
    );

    let start = Instant::now();
    let merged = merge::merge_worker_outputs(&config.scratch_dir, reports.len() as u32)?;
    summary.merge = Some(merged);
    summary.times.merge = start.elapsed();

    if !config.recreate_tables {
        store::empty_tables(&mut conn)?;
    }

    let start = Instant::now();
    summary.loaded = import::run_load(&mut conn, &config.scratch_dir, LOAD_ORDER)?;
    if !corrections.is_empty() {
        summary.overridden = overrides::apply(&mut conn, &corrections)?;
    }
    summary.times.load = start.elapsed();
    Ok(())
}

/// Registry seeding, registry reconciliation and catalog refresh, each on request.
fn maintain_reference_data(
    config: &PipelineConfig,
    conn: &mut Connection,
    summary: &mut PipelineSummary,
) -> Result<()> {
    if config.seed_registry {
        summary.seeded = registry::seed_from_store(&config.registry_dir, conn)?;
    }

    if !config.refresh_ids && !config.refresh_caches {
        return Ok(());
    }

    let index = cache::load_or_build(&config.dump, &config.scratch_dir)?;
    if index.malformed_lines > 0 {
        warn!(lines = index.malformed_lines, "Malformed lines seen while indexing");
    }

    if config.refresh_ids {
        summary.registry = registry::reconcile_all(&config.registry_dir, &index.names)?;
    }
    if config.refresh_caches {
        if index.catalog.is_empty() {
            info!("Dump lists no commodities or modules, catalog unchanged");
        } else {
            summary.catalog = Some(index.catalog.store(conn)?);
        }
    }
    Ok(())
}

/// Runs every unit and waits for all of them. Any failure fails the whole run.
fn launch_workers(config: &PipelineConfig) -> Result<Vec<WorkerReport>> {
    let units = WorkUnit::all(config.jobs as u32);

    match &config.launcher {
        Launcher::Threads => run_threads(config, &units)?,
        Launcher::Processes { exe, verbosity } => run_processes(config, &units, exe, *verbosity)?,
    }

    units
        .iter()
        .map(|&unit| {
            report::load_valid(&config.scratch_dir, &config.dump, unit)
                .with_context(|| format!("Worker {} did not complete", unit.worker_id))
        })
        .collect()
}

fn run_threads(config: &PipelineConfig, units: &[WorkUnit]) -> Result<()> {
    let lookups = {
        let conn = store::open(&config.db)?;
        LookupTables::load(&conn)?
    };
    let registry = NameRegistry::load(&config.registry_dir)?;

    let failed = units
        .par_iter()
        .map(|&unit| {
            extract::run_worker_with(&config.worker_config(unit), &registry, &lookups)
                .map_err(|e| {
                    error!(worker = unit.worker_id, "Worker failed: {:#}", e);
                    e
                })
                .is_err()
        })
        .filter(|failed| *failed)
        .count();

    if failed > 0 {
        bail!("{failed} of {} workers failed", units.len());
    }
    Ok(())
}

fn run_processes(
    config: &PipelineConfig,
    units: &[WorkUnit],
    exe: &Path,
    verbosity: u8,
) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("galaxy-etl-supervisor")
        .enable_all()
        .build()?;
    rt.block_on(supervise(config, units, exe, verbosity))
}

fn worker_args(config: &WorkerConfig, verbosity: u8) -> Vec<String> {
    let mut args = Vec::new();
    if verbosity > 0 {
        args.push(format!("-{}", "v".repeat(verbosity as usize)));
    }
    args.extend([
        "worker".to_string(),
        "--dump".to_string(),
        config.dump.to_string_lossy().to_string(),
        "--db".to_string(),
        config.db.to_string_lossy().to_string(),
        "--registry-dir".to_string(),
        config.registry_dir.to_string_lossy().to_string(),
        "--scratch-dir".to_string(),
        config.scratch_dir.to_string_lossy().to_string(),
        "--worker-id".to_string(),
        config.unit.worker_id.to_string(),
        "--total-workers".to_string(),
        config.unit.total_workers.to_string(),
    ]);
    if config.include_market {
        args.push("--market".to_string());
    }
    args
}

async fn supervise(
    config: &PipelineConfig,
    units: &[WorkUnit],
    exe: &Path,
    verbosity: u8,
) -> Result<()> {
    let mut in_flight = FuturesUnordered::new();
    for &unit in units {
        let args = worker_args(&config.worker_config(unit), verbosity);
        let mut command = Command::new(exe);
        command.args(&args).kill_on_drop(true);
        in_flight.push(async move {
            let status: std::io::Result<ExitStatus> = command.status().await;
            (unit, status)
        });
    }
    info!(workers = units.len(), "Worker processes started");

    let mut failed = 0usize;
    while let Some((unit, status)) = in_flight.next().await {
        match status {
            Ok(status) if status.success() => {
                info!(worker = unit.worker_id, "Worker process exited");
            }
            Ok(status) => {
                failed += 1;
                error!(worker = unit.worker_id, %status, "Worker process failed");
            }
            Err(e) => {
                failed += 1;
                error!(worker = unit.worker_id, error = %e, "Failed to run worker process");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} worker processes failed", units.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            dump: dir.join("galaxy.json"),
            db: dir.join("galaxy.sqlite"),
            registry_dir: dir.join("registry"),
            scratch_dir: dir.join("scratch"),
            jobs: 2,
            refresh_ids: true,
            refresh_caches: false,
            include_market: true,
            recreate_tables: false,
            skip_load: false,
            cleanup: true,
            seed_registry: false,
            launcher: Launcher::Threads,
        }
    }

    #[test]
    fn worker_args_round_trip_through_the_cli_shape() {
        let dir = Path::new("/data");
        let cfg = config(dir).worker_config(WorkUnit::new(1, 2).unwrap());
        let args = worker_args(&cfg, 2);
        assert_eq!(args[0], "-vv");
        assert_eq!(args[1], "worker");
        let pos = args.iter().position(|a| a == "--worker-id").unwrap();
        assert_eq!(args[pos + 1], "1");
        assert_eq!(args.last().map(String::as_str), Some("--market"));
    }

    #[test]
    fn quiet_workers_get_no_verbosity_flag() {
        let cfg = config(Path::new("/data")).worker_config(WorkUnit::whole());
        assert_eq!(worker_args(&cfg, 0)[0], "worker");
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.jobs = 0;
        assert!(run(&cfg).is_err());
    }
}
