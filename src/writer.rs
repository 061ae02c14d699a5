use crate::config::{MERGE_BUFFER_SIZE, WRITER_BUFFER_SIZE};
use crate::models::{EntityKind, TransformResult};
use crate::partition::WorkUnit;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Lines, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Intermediate file of one worker for one entity kind, e.g. `factions.03.json`.
pub fn worker_file(dir: &Path, kind: EntityKind, unit: WorkUnit) -> PathBuf {
    dir.join(format!("{}.{}.json", kind.file_stem(), unit.label()))
}

/// Merged file for one entity kind, e.g. `factions.json`.
pub fn merged_file(dir: &Path, kind: EntityKind) -> PathBuf {
    dir.join(format!("{}.json", kind.file_stem()))
}

/// Writes a JSON array with one element per line.
///
/// The output of a crash is a prefix of the final file: every complete line is
/// still a readable record.
pub struct JsonArrayWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> JsonArrayWriter<W> {
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(b"[")?;
        Ok(Self { inner, count: 0 })
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        self.write_separator()?;
        serde_json::to_writer(&mut self.inner, record)?;
        Ok(())
    }

    /// Writes an already serialized record verbatim.
    pub fn write_raw(&mut self, line: &str) -> io::Result<()> {
        self.write_separator()?;
        self.inner.write_all(line.as_bytes())
    }

    fn write_separator(&mut self) -> io::Result<()> {
        let sep: &[u8] = if self.count == 0 { b"\n" } else { b",\n" };
        self.count += 1;
        self.inner.write_all(sep)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.inner.write_all(b"\n]\n")?;
        self.inner.flush()?;
        Ok((self.inner, self.count))
    }
}

pub fn create_array_file(path: &Path, capacity: usize) -> Result<JsonArrayWriter<BufWriter<File>>> {
    let file =
        File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    Ok(JsonArrayWriter::new(BufWriter::with_capacity(capacity, file))?)
}

/// One open output file per entity kind for a single worker.
pub struct PartialResultWriter {
    writers: Vec<(EntityKind, JsonArrayWriter<BufWriter<File>>)>,
}

impl PartialResultWriter {
    pub fn create(dir: &Path, unit: WorkUnit) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create scratch directory: {:?}", dir))?;
        let writers = EntityKind::ALL
            .iter()
            .map(|&kind| {
                create_array_file(&worker_file(dir, kind, unit), WRITER_BUFFER_SIZE)
                    .map(|w| (kind, w))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { writers })
    }

    fn writer(&mut self, kind: EntityKind) -> &mut JsonArrayWriter<BufWriter<File>> {
        &mut self.writers[kind as usize].1
    }

    pub fn write_result(&mut self, result: &TransformResult) -> Result<()> {
        self.writer(EntityKind::Systems).write(&result.system)?;

        for presence in &result.factions {
            self.writer(EntityKind::Factions).write(&presence.faction)?;
            self.writer(EntityKind::Influences).write(&presence.influence)?;
            for state in &presence.states {
                self.writer(EntityKind::FactionStates).write(state)?;
            }
        }

        for bundle in &result.stations {
            self.writer(EntityKind::Stations).write(&bundle.station)?;
            self.writer(EntityKind::Features).write(&bundle.features)?;
            for economy in &bundle.economies {
                self.writer(EntityKind::Economies).write(economy)?;
            }
            for pricing in &bundle.commodity_pricing {
                self.writer(EntityKind::CommodityPricing).write(pricing)?;
            }
            for sale in &bundle.modules_sold {
                self.writer(EntityKind::ModulesSold).write(sale)?;
            }
        }

        for stub in &result.stubs {
            self.writer(EntityKind::ControllingFactions).write(stub)?;
        }
        Ok(())
    }

    /// Closes every array and returns the record count per kind.
    pub fn finish(self) -> Result<Vec<(EntityKind, u64)>> {
        let mut counts = Vec::with_capacity(self.writers.len());
        for (kind, writer) in self.writers {
            let (_, count) = writer
                .finish()
                .with_context(|| format!("Failed to flush {} output", kind.file_stem()))?;
            counts.push((kind, count));
        }
        Ok(counts)
    }
}

/// Record text of each element line of a one-per-line JSON array, trailing comma removed.
pub struct RecordLines<R> {
    lines: Lines<R>,
}

impl<R: BufRead> RecordLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl RecordLines<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open intermediate file: {:?}", path))?;
        Ok(Self::new(BufReader::with_capacity(MERGE_BUFFER_SIZE, file)))
    }
}

impl<R: BufRead> Iterator for RecordLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == "[" || trimmed == "]" {
                continue;
            }
            let record = trimmed.strip_suffix(',').unwrap_or(trimmed);
            return Some(Ok(record.to_string()));
        }
    }
}

/// Typed view over [`RecordLines`].
pub struct Records<T, R> {
    lines: RecordLines<R>,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Records<T, BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            lines: RecordLines::open(path)?,
            _marker: PhantomData,
        })
    }
}

impl<T: DeserializeOwned, R: BufRead> Iterator for Records<T, R> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(e) => return Some(Err(e.into())),
        };
        Some(serde_json::from_str(&line).with_context(|| format!("Malformed record: {line}")))
    }
}

fn is_scratch_file(name: &str) -> bool {
    let Some(rest) = name.strip_suffix(".json") else {
        return name.starts_with("report.") && name.ends_with(".bin");
    };
    EntityKind::ALL.iter().any(|kind| {
        let stem = kind.file_stem();
        rest == stem
            || rest
                .strip_prefix(stem)
                .and_then(|r| r.strip_prefix('.'))
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Removes every intermediate, merged and report file from `dir`. Returns how many were removed.
pub fn cleanup_scratch_files(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read scratch directory: {:?}", dir))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_scratch_file(name) && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())
                .with_context(|| format!("Failed to remove scratch file: {:?}", entry.path()))?;
            removed += 1;
        }
    }
    debug!(removed, dir = ?dir, "Scratch files removed");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FactionRecord, SystemRecord};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn faction(id: i64, name: &str) -> FactionRecord {
        FactionRecord {
            id,
            name: name.to_string(),
            allegiance_id: Some(4),
            government_id: Some(64),
            state_id: Some(80),
            updated_at: 0,
        }
    }

    fn system(id: i64, name: &str) -> SystemRecord {
        SystemRecord {
            id,
            ed_system_address: None,
            name: name.to_string(),
            population: Some(1000),
            needs_permit: false,
            allegiance_id: None,
            government_id: None,
            power_id: None,
            power_state_id: None,
            security_id: None,
            primary_economy_id: None,
            secondary_economy_id: None,
            controlling_minor_faction_id: None,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            updated_at: 0,
        }
    }

    #[test]
    fn array_writer_layout() {
        let mut writer = JsonArrayWriter::new(Vec::new()).unwrap();
        writer.write(&faction(1, "A")).unwrap();
        writer.write(&faction(2, "B")).unwrap();
        let (bytes, count) = writer.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(count, 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "[");
        assert!(lines[1].ends_with("},"));
        assert!(lines[2].ends_with('}'));
        assert_eq!(lines[3], "]");

        let parsed: Vec<FactionRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, vec![faction(1, "A"), faction(2, "B")]);
    }

    #[test]
    fn empty_array_is_valid_json() {
        let writer = JsonArrayWriter::new(Vec::new()).unwrap();
        let (bytes, count) = writer.finish().unwrap();
        assert_eq!(count, 0);
        let parsed: Vec<FactionRecord> = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn record_lines_strip_brackets_and_commas() {
        let input = "[\n{\"a\":1},\n{\"a\":2}\n]\n";
        let lines: Vec<String> = RecordLines::new(Cursor::new(input))
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn truncated_file_still_yields_complete_records() {
        let input = "[\n{\"id\":1,\"name\":\"A\",\"allegiance_id\":null,\"government_id\":null,\"state_id\":null,\"updated_at\":0},\n";
        let lines: Vec<String> = RecordLines::new(Cursor::new(input))
            .map(|l| l.unwrap())
            .collect();
        let record: FactionRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(record.id, 1);
    }

    #[test]
    fn partial_writer_creates_one_file_per_kind() {
        let dir = TempDir::new().unwrap();
        let unit = WorkUnit::new(1, 4).unwrap();
        let mut writer = PartialResultWriter::create(dir.path(), unit).unwrap();
        let result = TransformResult {
            system: system(7, "Sol"),
            factions: Vec::new(),
            stations: Vec::new(),
            stubs: vec![faction(9, "Stub")],
            skipped: Vec::new(),
        };
        writer.write_result(&result).unwrap();
        let counts = writer.finish().unwrap();

        for kind in EntityKind::ALL {
            assert!(worker_file(dir.path(), kind, unit).exists(), "{kind:?}");
        }
        assert!(counts.contains(&(EntityKind::Systems, 1)));
        assert!(counts.contains(&(EntityKind::ControllingFactions, 1)));
        assert!(counts.contains(&(EntityKind::Stations, 0)));

        let systems: Vec<SystemRecord> =
            Records::open(&worker_file(dir.path(), EntityKind::Systems, unit))
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
        assert_eq!(systems, vec![system(7, "Sol")]);
    }

    #[test]
    fn worker_and_merged_file_names() {
        let dir = Path::new("/scratch");
        let unit = WorkUnit::new(3, 8).unwrap();
        assert_eq!(
            worker_file(dir, EntityKind::Factions, unit),
            PathBuf::from("/scratch/factions.03.json")
        );
        assert_eq!(
            merged_file(dir, EntityKind::Features),
            PathBuf::from("/scratch/station_features.json")
        );
    }

    #[test]
    fn cleanup_removes_only_scratch_files() {
        let dir = TempDir::new().unwrap();
        for name in [
            "systems.00.json",
            "factions.json",
            "controlling_factions.11.json",
            "report.02.bin",
            "galaxy_stations.json",
            "systemMap.json",
            "systems.backup.json",
        ] {
            fs::write(dir.path().join(name), "[]").unwrap();
        }

        let removed = cleanup_scratch_files(dir.path()).unwrap();
        assert_eq!(removed, 4);
        assert!(dir.path().join("galaxy_stations.json").exists());
        assert!(dir.path().join("systemMap.json").exists());
        assert!(dir.path().join("systems.backup.json").exists());
        assert!(!dir.path().join("factions.json").exists());
    }
}
