use crate::models::{SkipReason, TransformResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Serializable snapshot of [`TransformStats`], carried in worker reports.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TransformCounts {
    pub lines_read: u64,
    pub systems: u64,
    pub factions: u64,
    pub stations: u64,
    pub stubs: u64,
    pub malformed_lines: u64,
    pub missing_ids: u64,
    pub skipped_factions: u64,
    pub skipped_stations: u64,
    pub skipped_market_rows: u64,
}

impl TransformCounts {
    /// Adds another worker's counts into this one.
    pub fn merge(&mut self, other: &TransformCounts) {
        self.lines_read += other.lines_read;
        self.systems += other.systems;
        self.factions += other.factions;
        self.stations += other.stations;
        self.stubs += other.stubs;
        self.malformed_lines += other.malformed_lines;
        self.missing_ids += other.missing_ids;
        self.skipped_factions += other.skipped_factions;
        self.skipped_stations += other.skipped_stations;
        self.skipped_market_rows += other.skipped_market_rows;
    }
}

/// Statistics collected during one worker's transform pass
#[derive(Default)]
pub struct TransformStats {
    pub lines_read: AtomicU64,
    pub systems_written: AtomicU64,
    pub factions_written: AtomicU64,
    pub stations_written: AtomicU64,
    pub stubs_written: AtomicU64,
    pub malformed_lines: AtomicU64,
    pub missing_ids: AtomicU64,
    pub skipped_factions: AtomicU64,
    pub skipped_stations: AtomicU64,
    pub skipped_market_rows: AtomicU64,
}

impl TransformStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_lines(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_missing_ids(&self) {
        self.missing_ids.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts the rows and skips of one transformed system.
    pub fn record(&self, result: &TransformResult) {
        self.systems_written.fetch_add(1, Ordering::Relaxed);
        self.factions_written
            .fetch_add(result.factions.len() as u64, Ordering::Relaxed);
        self.stations_written
            .fetch_add(result.stations.len() as u64, Ordering::Relaxed);
        self.stubs_written
            .fetch_add(result.stubs.len() as u64, Ordering::Relaxed);

        for skip in &result.skipped {
            let counter = match skip.reason {
                SkipReason::UnregisteredFaction => &self.skipped_factions,
                SkipReason::UnknownStationType | SkipReason::UnregisteredStation => {
                    &self.skipped_stations
                }
                SkipReason::UnknownCommodity | SkipReason::UnknownModule => {
                    &self.skipped_market_rows
                }
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn lines(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn systems(&self) -> u64 {
        self.systems_written.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed_lines.load(Ordering::Relaxed)
    }

    pub fn missing(&self) -> u64 {
        self.missing_ids.load(Ordering::Relaxed)
    }

    /// Convert to counts for persistence
    pub fn to_counts(&self) -> TransformCounts {
        TransformCounts {
            lines_read: self.lines(),
            systems: self.systems(),
            factions: self.factions_written.load(Ordering::Relaxed),
            stations: self.stations_written.load(Ordering::Relaxed),
            stubs: self.stubs_written.load(Ordering::Relaxed),
            malformed_lines: self.malformed(),
            missing_ids: self.missing(),
            skipped_factions: self.skipped_factions.load(Ordering::Relaxed),
            skipped_stations: self.skipped_stations.load(Ordering::Relaxed),
            skipped_market_rows: self.skipped_market_rows.load(Ordering::Relaxed),
        }
    }
}
