use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// Identity of one worker's stripe of the dump: lines `i` with `i % total_workers == worker_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub worker_id: u32,
    pub total_workers: u32,
}

impl WorkUnit {
    pub fn new(worker_id: u32, total_workers: u32) -> Result<Self> {
        if total_workers == 0 {
            bail!("Worker count must be at least 1");
        }
        if worker_id >= total_workers {
            bail!("Worker id {worker_id} out of range for {total_workers} workers");
        }
        Ok(Self {
            worker_id,
            total_workers,
        })
    }

    /// A single unit covering every line.
    pub fn whole() -> Self {
        Self {
            worker_id: 0,
            total_workers: 1,
        }
    }

    /// Every unit of a run with `total_workers` workers.
    pub fn all(total_workers: u32) -> Vec<Self> {
        (0..total_workers)
            .map(|worker_id| Self {
                worker_id,
                total_workers,
            })
            .collect()
    }

    pub fn owns(&self, line_index: u64) -> bool {
        line_index % u64::from(self.total_workers) == u64::from(self.worker_id)
    }

    /// Zero padded worker number used in file names.
    pub fn label(&self) -> String {
        format!("{:02}", self.worker_id)
    }
}

/// One physical line owned by the current unit.
pub struct StripedLine {
    pub index: u64,
    pub bytes: Vec<u8>,
}

/// Iterates the lines of a reader that belong to one work unit.
///
/// The line counter advances for every physical line, owned or not, so every
/// worker agrees on line numbering without pre-splitting the file.
pub struct StripedLines<R> {
    reader: R,
    unit: WorkUnit,
    next_index: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> StripedLines<R> {
    pub fn new(reader: R, unit: WorkUnit) -> Self {
        Self {
            reader,
            unit,
            next_index: 0,
            buf: Vec::with_capacity(64 * 1024),
        }
    }

    /// Number of physical lines consumed so far.
    pub fn lines_seen(&self) -> u64 {
        self.next_index
    }
}

impl<R: BufRead> Iterator for StripedLines<R> {
    type Item = std::io::Result<StripedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    if self.unit.owns(index) {
                        return Some(Ok(StripedLine {
                            index,
                            bytes: std::mem::take(&mut self.buf),
                        }));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
