use crate::config::MERGE_BUFFER_SIZE;
use crate::models::EntityKind;
use crate::partition::WorkUnit;
use crate::writer::{create_array_file, merged_file, worker_file, RecordLines};
use anyhow::{bail, Context, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Just enough of a faction record to deduplicate it.
#[derive(Deserialize)]
struct IdOnly {
    id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactionMergeCounts {
    pub written: u64,
    pub from_stubs: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub factions: FactionMergeCounts,
    pub rows: Vec<(EntityKind, u64)>,
}

impl MergeSummary {
    pub fn rows_for(&self, kind: EntityKind) -> u64 {
        self.rows
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    }
}

/// Merges faction fragments and stubs into one file, first record per id wins.
///
/// All fragments are read before any stub so a real faction record always beats
/// the placeholder synthesized for the same id. Records are copied verbatim.
pub fn merge_factions(
    fragments: &[PathBuf],
    stubs: &[PathBuf],
    output: &Path,
) -> Result<FactionMergeCounts> {
    let mut writer = create_array_file(output, MERGE_BUFFER_SIZE)?;
    let mut seen_ids = FxHashSet::default();
    let mut counts = FactionMergeCounts::default();

    let inputs = fragments
        .iter()
        .map(|p| (p, false))
        .chain(stubs.iter().map(|p| (p, true)));

    for (path, is_stub) in inputs {
        for line in RecordLines::open(path)? {
            let line = line.with_context(|| format!("Failed to read {:?}", path))?;
            let IdOnly { id } = serde_json::from_str(&line)
                .with_context(|| format!("Faction record without id in {:?}: {line}", path))?;

            if seen_ids.insert(id) {
                writer.write_raw(&line)?;
                if is_stub {
                    counts.from_stubs += 1;
                }
            } else {
                counts.duplicates += 1;
            }
        }
    }

    let (_, written) = writer
        .finish()
        .with_context(|| format!("Failed to flush {:?}", output))?;
    counts.written = written;
    Ok(counts)
}

/// Concatenates worker files in worker order.
pub fn merge_simple(inputs: &[PathBuf], output: &Path) -> Result<u64> {
    let mut writer = create_array_file(output, MERGE_BUFFER_SIZE)?;
    for path in inputs {
        for line in RecordLines::open(path)? {
            let line = line.with_context(|| format!("Failed to read {:?}", path))?;
            writer.write_raw(&line)?;
        }
    }
    let (_, written) = writer
        .finish()
        .with_context(|| format!("Failed to flush {:?}", output))?;
    Ok(written)
}

/// Produces one merged file per loadable entity kind from the files of every worker.
pub fn merge_worker_outputs(dir: &Path, total_workers: u32) -> Result<MergeSummary> {
    let units = WorkUnit::all(total_workers);
    if units.is_empty() {
        bail!("Nothing to merge: no workers");
    }
    let files_for = |kind: EntityKind| -> Vec<PathBuf> {
        units.iter().map(|&unit| worker_file(dir, kind, unit)).collect()
    };

    let mut summary = MergeSummary::default();
    for kind in EntityKind::ALL.into_iter().filter(|k| k.is_loadable()) {
        let output = merged_file(dir, kind);
        let written = if kind == EntityKind::Factions {
            let counts = merge_factions(
                &files_for(EntityKind::Factions),
                &files_for(EntityKind::ControllingFactions),
                &output,
            )?;
            info!(
                unique = counts.written,
                stubs = counts.from_stubs,
                duplicates = counts.duplicates,
                "Factions merged"
            );
            let written = counts.written;
            summary.factions = counts;
            written
        } else {
            let written = merge_simple(&files_for(kind), &output)?;
            debug!(kind = kind.file_stem(), rows = written, "Merged");
            written
        };
        summary.rows.push((kind, written));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FactionRecord;
    use crate::writer::{JsonArrayWriter, Records};
    use std::fs;
    use tempfile::TempDir;

    fn faction(id: i64, name: &str, state_id: Option<i64>) -> FactionRecord {
        FactionRecord {
            id,
            name: name.to_string(),
            allegiance_id: Some(4),
            government_id: Some(64),
            state_id,
            updated_at: 0,
        }
    }

    fn write_factions(path: &Path, records: &[FactionRecord]) {
        let mut writer = JsonArrayWriter::new(fs::File::create(path).unwrap()).unwrap();
        for r in records {
            writer.write(r).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_factions(path: &Path) -> Vec<FactionRecord> {
        Records::open(path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn same_faction_from_two_workers_is_written_once() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("factions.00.json");
        let b = dir.path().join("factions.01.json");
        write_factions(&a, &[faction(75397, "Rana State Network", Some(80))]);
        write_factions(
            &b,
            &[
                faction(75397, "Rana State Network", Some(16)),
                faction(2, "Mother Gaia", None),
            ],
        );

        let out = dir.path().join("factions.json");
        let counts = merge_factions(&[a, b], &[], &out).unwrap();
        assert_eq!(counts.written, 2);
        assert_eq!(counts.duplicates, 1);

        let merged = read_factions(&out);
        let with_id: Vec<_> = merged.iter().filter(|f| f.id == 75397).collect();
        assert_eq!(with_id.len(), 1);
        assert_eq!(with_id[0].state_id, Some(80));
    }

    #[test]
    fn real_records_beat_stubs() {
        let dir = TempDir::new().unwrap();
        let stub_file = dir.path().join("controlling_factions.00.json");
        let real_file = dir.path().join("factions.01.json");
        write_factions(&stub_file, &[faction(9, "Federal Navy", Some(80))]);
        write_factions(&real_file, &[faction(9, "Federal Navy", Some(16))]);

        let out = dir.path().join("factions.json");
        let counts = merge_factions(&[real_file], &[stub_file], &out).unwrap();
        assert_eq!(counts.from_stubs, 0);
        assert_eq!(read_factions(&out)[0].state_id, Some(16));
    }

    #[test]
    fn merging_twice_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("factions.00.json");
        let b = dir.path().join("factions.01.json");
        let s = dir.path().join("controlling_factions.00.json");
        write_factions(&a, &[faction(1, "A", None), faction(2, "B", None)]);
        write_factions(&b, &[faction(2, "B", Some(80)), faction(3, "C", None)]);
        write_factions(&s, &[faction(4, "D", Some(80)), faction(1, "A", Some(80))]);

        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        merge_factions(&[a.clone(), b.clone()], &[s.clone()], &first).unwrap();
        merge_factions(&[a, b], &[s], &second).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
        assert_eq!(read_factions(&first).len(), 4);
    }

    #[test]
    fn simple_merge_concatenates_in_worker_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("systems.00.json");
        let b = dir.path().join("systems.01.json");
        write_factions(&a, &[faction(1, "A", None)]);
        write_factions(&b, &[]);
        let c = dir.path().join("systems.02.json");
        write_factions(&c, &[faction(2, "B", None), faction(1, "A", None)]);

        let out = dir.path().join("systems.json");
        assert_eq!(merge_simple(&[a, b, c], &out).unwrap(), 3);
        let ids: Vec<i64> = read_factions(&out).iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 1]);
    }

    #[test]
    fn merge_worker_outputs_covers_every_loadable_kind() {
        let dir = TempDir::new().unwrap();
        for unit in WorkUnit::all(2) {
            crate::writer::PartialResultWriter::create(dir.path(), unit)
                .unwrap()
                .finish()
                .unwrap();
        }
        let summary = merge_worker_outputs(dir.path(), 2).unwrap();
        assert_eq!(summary.rows.len(), EntityKind::ALL.len() - 1);
        for kind in EntityKind::ALL.iter().filter(|k| k.is_loadable()) {
            assert!(merged_file(dir.path(), *kind).exists());
            assert_eq!(summary.rows_for(*kind), 0);
        }
        assert!(!merged_file(dir.path(), EntityKind::ControllingFactions).exists());
    }
}
