use crate::config::REPORT_VERSION;
use crate::models::EntityKind;
use crate::partition::WorkUnit;
use crate::stats::TransformCounts;
use anyhow::{bail, Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Result of one worker, written when its pass completes.
///
/// The orchestrator only trusts a worker that exited cleanly and left a report
/// matching the current dump and partition.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkerReport {
    pub version: u32,
    pub dump_path: String,
    pub dump_mtime: u64,
    pub unit: WorkUnit,
    pub counts: TransformCounts,
    pub rows: Vec<(EntityKind, u64)>,
}

impl WorkerReport {
    pub fn new(
        dump_path: &Path,
        unit: WorkUnit,
        counts: TransformCounts,
        rows: Vec<(EntityKind, u64)>,
    ) -> Result<Self> {
        Ok(Self {
            version: REPORT_VERSION,
            dump_path: dump_path.to_string_lossy().to_string(),
            dump_mtime: dump_mtime(dump_path)?,
            unit,
            counts,
            rows,
        })
    }

    pub fn rows_for(&self, kind: EntityKind) -> u64 {
        self.rows
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    }
}

pub fn report_path(dir: &Path, unit: WorkUnit) -> PathBuf {
    dir.join(format!("report.{}.bin", unit.label()))
}

pub fn dump_mtime(dump_path: &Path) -> Result<u64> {
    let metadata = fs::metadata(dump_path)
        .with_context(|| format!("Failed to get metadata for: {:?}", dump_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok(mtime)
}

/// Writes the report atomically via rename.
pub fn save(dir: &Path, report: &WorkerReport) -> Result<()> {
    let path = report_path(dir, report.unit);
    let tmp_path = path.with_extension("bin.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp report file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    bincode::DefaultOptions::new()
        .serialize_into(writer, report)
        .context("Failed to serialize worker report")?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("Failed to rename temp report file to: {:?}", path))?;

    debug!(worker = report.unit.worker_id, "Worker report saved");
    Ok(())
}

/// Loads the report of `unit`, failing if it is missing or was produced for another run.
pub fn load_valid(dir: &Path, dump_path: &Path, unit: WorkUnit) -> Result<WorkerReport> {
    let path = report_path(dir, unit);
    if !path.exists() {
        bail!("Worker {} left no report at {:?}", unit.worker_id, path);
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(&path).context("Failed to open worker report")?;
    let options = bincode::options().with_limit(file_size.saturating_add(1024));
    let report: WorkerReport = options
        .deserialize_from(BufReader::new(file))
        .with_context(|| format!("Worker report is corrupt: {:?}", path))?;

    if report.version != REPORT_VERSION {
        bail!(
            "Worker {} report version {} does not match {}",
            unit.worker_id,
            report.version,
            REPORT_VERSION
        );
    }
    if report.unit != unit {
        bail!(
            "Worker {} report is for unit {}/{}",
            unit.worker_id,
            report.unit.worker_id,
            report.unit.total_workers
        );
    }
    let current = dump_path.to_string_lossy();
    if report.dump_path != current {
        bail!(
            "Worker {} report is for dump {} not {}",
            unit.worker_id,
            report.dump_path,
            current
        );
    }
    if report.dump_mtime != dump_mtime(dump_path)? {
        bail!("Dump changed while worker {} was running", unit.worker_id);
    }

    Ok(report)
}
