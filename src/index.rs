use crate::catalog::Catalog;
use crate::config::PROGRESS_INTERVAL;
use crate::parser::{open_dump, parse_system_line, NameRef, RawSystem};
use crate::registry::{station_key, ObservedNames};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use tracing::{info, warn};

/// Everything the maintenance pass learns from one full scan of the dump.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpIndex {
    pub names: ObservedNames,
    pub catalog: Catalog,
    pub malformed_lines: u64,
}

#[derive(Default)]
struct NameSets {
    systems: FxHashSet<String>,
    factions: FxHashSet<String>,
    stations: FxHashSet<String>,
}

impl NameSets {
    fn observe(&mut self, system: &RawSystem) {
        self.systems.insert(system.name.clone());
        if let Some(controlling) = &system.controlling_faction {
            self.factions.insert(controlling.name().to_string());
        }
        for faction in &system.factions {
            self.factions.insert(faction.name.clone());
        }
        for station in system.all_stations() {
            self.stations.insert(station_key(
                &system.name,
                &station.name,
                station.station_type.as_deref(),
            ));
            if let Some(controlling) = station.controlling_faction.as_ref().map(NameRef::name) {
                self.factions.insert(controlling.to_string());
            }
        }
    }

    fn into_observed(self) -> ObservedNames {
        let mut observed = ObservedNames {
            systems: self.systems.into_iter().collect(),
            factions: self.factions.into_iter().collect(),
            stations: self.stations.into_iter().collect(),
        };
        observed.normalize();
        observed
    }
}

impl DumpIndex {
    /// Scans the whole dump on the current thread.
    pub fn build(path: &Path) -> Result<Self> {
        let reader = open_dump(path)?;
        info!("Building name index from: {:?}", path);
        Self::from_reader(reader).with_context(|| format!("Failed to index dump: {:?}", path))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut names = NameSets::default();
        let mut catalog = Catalog::default();
        let mut malformed_lines = 0u64;
        let pb = ProgressBar::new_spinner();

        for (i, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            match parse_system_line(&line) {
                Ok(Some(system)) => {
                    names.observe(&system);
                    for station in system.all_stations() {
                        catalog.observe_station(station);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    malformed_lines += 1;
                    warn!(line = i, error = %e, "Skipping malformed dump line");
                }
            }
            if i as u64 % PROGRESS_INTERVAL == 0 {
                pb.tick();
            }
        }

        pb.finish_and_clear();

        let index = Self {
            names: names.into_observed(),
            catalog,
            malformed_lines,
        };
        info!(
            systems = index.names.systems.len(),
            factions = index.names.factions.len(),
            stations = index.names.stations.len(),
            commodities = index.catalog.commodities.len(),
            modules = index.catalog.modules.len(),
            "Name index built"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DUMP: &str = r#"[
{"name":"Sol","coords":{"x":0,"y":0,"z":0},"controllingFaction":{"name":"Mother Gaia"},"factions":[{"name":"Mother Gaia"},{"name":"Sol Workers' Party"}],"stations":[{"name":"Galileo","type":"Ocellus Starport","controllingFaction":"Federal Navy"},{"name":"K7Q-BQL","type":"Drake-Class Carrier"}],"bodies":[{"name":"Earth","stations":[{"name":"Abraham Lincoln","type":"Planetary Port"}]}]},
not json at all
{"name":"Rana","coords":{"x":0,"y":0,"z":0},"factions":[{"name":"Rana State Network"},{"name":"Mother Gaia"}]},
{"name":"Sol","coords":{"x":0,"y":0,"z":0},"factions":[]}
]
"#;

    #[test]
    fn collects_sorted_unique_names() {
        let index = DumpIndex::from_reader(Cursor::new(DUMP)).unwrap();

        assert_eq!(index.names.systems, vec!["Rana", "Sol"]);
        assert_eq!(
            index.names.factions,
            vec![
                "Federal Navy",
                "Mother Gaia",
                "Rana State Network",
                "Sol Workers' Party"
            ]
        );
        assert_eq!(
            index.names.stations,
            vec!["K7Q-BQL", "Sol_Abraham Lincoln", "Sol_Galileo"]
        );
        assert_eq!(index.malformed_lines, 1);
    }

    #[test]
    fn empty_dump_gives_empty_index() {
        let index = DumpIndex::from_reader(Cursor::new("[\n]\n")).unwrap();
        assert_eq!(index, DumpIndex::default());
    }
}
