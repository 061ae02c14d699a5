use crate::config::{
    CARRIER_TYPES, FACTION_MAP_STEM, STATION_KEY_SEP, STATION_MAP_STEM, SYSTEM_MAP_STEM,
};
use crate::error::TransformError;
use crate::store;
use anyhow::{Context, Result};
use rusqlite::Connection;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The three independent name spaces of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameCategory {
    System,
    Faction,
    Station,
}

impl NameCategory {
    pub const ALL: [NameCategory; 3] = [
        NameCategory::System,
        NameCategory::Faction,
        NameCategory::Station,
    ];

    pub fn file_stem(self) -> &'static str {
        match self {
            NameCategory::System => SYSTEM_MAP_STEM,
            NameCategory::Faction => FACTION_MAP_STEM,
            NameCategory::Station => STATION_MAP_STEM,
        }
    }

    pub fn map_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.file_stem()))
    }

    /// Names added by the most recent maintenance pass.
    pub fn delta_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.new.json", self.file_stem()))
    }
}

impl fmt::Display for NameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NameCategory::System => "system",
            NameCategory::Faction => "faction",
            NameCategory::Station => "station",
        };
        f.write_str(name)
    }
}

/// Registry key of a station. Carriers move between systems so they are keyed by name alone.
pub fn station_key(system: &str, station: &str, station_type: Option<&str>) -> String {
    match station_type {
        Some(t) if CARRIER_TYPES.contains(&t) => station.to_string(),
        _ => format!("{system}{STATION_KEY_SEP}{station}"),
    }
}

/// Immutable snapshot of the durable name→id maps.
#[derive(Debug, Default, Clone)]
pub struct NameRegistry {
    systems: FxHashMap<String, i64>,
    factions: FxHashMap<String, i64>,
    stations: FxHashMap<String, i64>,
}

impl NameRegistry {
    /// Loads all three maps from `dir`. A missing file is an empty map.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut registry = Self::default();
        for category in NameCategory::ALL {
            let map = read_map(&category.map_path(dir))?;
            *registry.map_mut(category) = map.into_iter().collect();
        }
        info!(
            systems = registry.systems.len(),
            factions = registry.factions.len(),
            stations = registry.stations.len(),
            "Name registry loaded"
        );
        Ok(registry)
    }

    pub fn from_maps(
        systems: FxHashMap<String, i64>,
        factions: FxHashMap<String, i64>,
        stations: FxHashMap<String, i64>,
    ) -> Self {
        Self {
            systems,
            factions,
            stations,
        }
    }

    /// True when every registry file exists in `dir`.
    pub fn files_present(dir: &Path) -> bool {
        NameCategory::ALL
            .iter()
            .all(|c| c.map_path(dir).exists())
    }

    fn map(&self, category: NameCategory) -> &FxHashMap<String, i64> {
        match category {
            NameCategory::System => &self.systems,
            NameCategory::Faction => &self.factions,
            NameCategory::Station => &self.stations,
        }
    }

    fn map_mut(&mut self, category: NameCategory) -> &mut FxHashMap<String, i64> {
        match category {
            NameCategory::System => &mut self.systems,
            NameCategory::Faction => &mut self.factions,
            NameCategory::Station => &mut self.stations,
        }
    }

    pub fn get(&self, category: NameCategory, name: &str) -> Option<i64> {
        self.map(category).get(name).copied()
    }

    /// Like [`get`](Self::get) but a miss is a [`TransformError::MissingId`].
    pub fn resolve(&self, category: NameCategory, name: &str) -> Result<i64, TransformError> {
        self.get(category, name)
            .ok_or_else(|| TransformError::MissingId {
                category,
                name: name.to_string(),
            })
    }

    pub fn len(&self, category: NameCategory) -> usize {
        self.map(category).len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty() && self.factions.is_empty() && self.stations.is_empty()
    }
}

/// Every registry name seen in one dump, sorted and deduplicated per category.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedNames {
    pub systems: Vec<String>,
    pub factions: Vec<String>,
    pub stations: Vec<String>,
}

impl ObservedNames {
    pub fn get(&self, category: NameCategory) -> &[String] {
        match category {
            NameCategory::System => &self.systems,
            NameCategory::Faction => &self.factions,
            NameCategory::Station => &self.stations,
        }
    }

    pub fn normalize(&mut self) {
        for names in [&mut self.systems, &mut self.factions, &mut self.stations] {
            names.sort_unstable();
            names.dedup();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub category: NameCategory,
    pub known: usize,
    pub added: usize,
}

/// Assigns ids to `missing` (sorted by the caller), filling gaps below the current maximum first.
///
/// The pool is `[1, max(known) + missing.len()]` minus `known`, consumed smallest first.
pub fn allocate_ids<'a>(
    known: impl IntoIterator<Item = &'a i64>,
    missing: &[String],
) -> Vec<(String, i64)> {
    let known: FxHashSet<i64> = known.into_iter().copied().collect();
    let max = known.iter().copied().max().unwrap_or(0).max(0);
    let upper = max + missing.len() as i64;

    (1..=upper)
        .filter(|id| !known.contains(id))
        .zip(missing)
        .map(|(id, name)| (name.clone(), id))
        .collect()
}

/// Extends the durable map for `category` with every observed name it lacks.
///
/// Writes the full map and the delta of this run, both atomically.
pub fn reconcile(dir: &Path, category: NameCategory, observed: &[String]) -> Result<ReconcileSummary> {
    let map_path = category.map_path(dir);
    let mut map = read_map(&map_path)?;

    let mut missing: Vec<String> = observed
        .iter()
        .filter(|name| !map.contains_key(name.as_str()))
        .cloned()
        .collect();
    missing.sort_unstable();
    missing.dedup();

    let assigned = allocate_ids(map.values(), &missing);
    let delta: BTreeMap<String, i64> = assigned.into_iter().collect();
    map.extend(delta.iter().map(|(k, v)| (k.clone(), *v)));

    write_map(&map_path, &map)?;
    write_map(&category.delta_path(dir), &delta)?;

    info!(
        category = %category,
        known = map.len(),
        added = delta.len(),
        "Registry reconciled"
    );

    Ok(ReconcileSummary {
        category,
        known: map.len(),
        added: delta.len(),
    })
}

pub fn reconcile_all(dir: &Path, observed: &ObservedNames) -> Result<Vec<ReconcileSummary>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create registry directory: {:?}", dir))?;
    NameCategory::ALL
        .iter()
        .map(|&category| reconcile(dir, category, observed.get(category)))
        .collect()
}

/// Adopts ids already present in the store for names the registry lacks.
///
/// An id already taken by another name in the registry is left alone.
pub fn seed_from_store(dir: &Path, conn: &Connection) -> Result<Vec<ReconcileSummary>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create registry directory: {:?}", dir))?;

    let mut summaries = Vec::with_capacity(NameCategory::ALL.len());
    for category in NameCategory::ALL {
        let map_path = category.map_path(dir);
        let mut map = read_map(&map_path)?;
        let mut taken: FxHashSet<i64> = map.values().copied().collect();
        let mut delta = BTreeMap::new();

        for (name, id) in store::registered_names(conn, category)? {
            if map.contains_key(&name) {
                continue;
            }
            if !taken.insert(id) {
                warn!(category = %category, name = %name, id, "Store id already used in registry, skipping");
                continue;
            }
            delta.insert(name, id);
        }

        map.extend(delta.iter().map(|(k, v)| (k.clone(), *v)));
        write_map(&map_path, &map)?;
        write_map(&category.delta_path(dir), &delta)?;

        info!(category = %category, added = delta.len(), "Registry seeded from store");
        summaries.push(ReconcileSummary {
            category,
            known: map.len(),
            added: delta.len(),
        });
    }
    Ok(summaries)
}

pub fn read_map(path: &Path) -> Result<BTreeMap<String, i64>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open registry file: {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse registry file: {:?}", path))
}

fn write_map(path: &Path, map: &BTreeMap<String, i64>) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp registry file: {:?}", tmp_path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, map).context("Failed to serialize registry map")?;
    writer.flush()?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp registry file to: {:?}", path))?;
    Ok(())
}
