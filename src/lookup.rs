use crate::preload;
use crate::store;
use anyhow::{Context, Result};
use rusqlite::Connection;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Categories of constant reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstantKind {
    Allegiance,
    Power,
    PowerState,
    Economy,
    Security,
    FactionState,
    Government,
    StationType,
    Ship,
    CommodityGroup,
    ModuleGroup,
}

impl ConstantKind {
    pub const ALL: [ConstantKind; 11] = [
        ConstantKind::Allegiance,
        ConstantKind::Power,
        ConstantKind::PowerState,
        ConstantKind::Economy,
        ConstantKind::Security,
        ConstantKind::FactionState,
        ConstantKind::Government,
        ConstantKind::StationType,
        ConstantKind::Ship,
        ConstantKind::CommodityGroup,
        ConstantKind::ModuleGroup,
    ];

    pub fn table(self) -> &'static str {
        match self {
            ConstantKind::Allegiance => "allegiance",
            ConstantKind::Power => "powers",
            ConstantKind::PowerState => "power_state",
            ConstantKind::Economy => "economies",
            ConstantKind::Security => "security",
            ConstantKind::FactionState => "faction_state",
            ConstantKind::Government => "gov_type",
            ConstantKind::StationType => "station_type",
            ConstantKind::Ship => "ships",
            ConstantKind::CommodityGroup => "commodity_groups",
            ConstantKind::ModuleGroup => "module_groups",
        }
    }
}

/// Source spellings that match neither the stored text nor its eddn form.
const ALIASES: &[(ConstantKind, &str, &str)] = &[
    (ConstantKind::PowerState, "Controlled", "Control"),
    (ConstantKind::StationType, "Mega ship", "Megaship"),
    (ConstantKind::StationType, "Drake-Class Carrier", "Fleet Carrier"),
    (ConstantKind::StationType, "Asteroid base", "Asteroid Base"),
    (ConstantKind::StationType, "Outpost", "Civilian Outpost"),
    (ConstantKind::StationType, "Settlement", "Odyssey Settlement"),
    (ConstantKind::Government, "Prison colony", "Prison Colony"),
    (ConstantKind::FactionState, "Civil unrest", "Civil Unrest"),
    (ConstantKind::FactionState, "Civil war", "Civil War"),
    (ConstantKind::FactionState, "Pirate attack", "Pirate Attack"),
];

/// One row of a constant table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantRow {
    pub id: i64,
    pub text: String,
    pub eddn: Option<String>,
}

/// Read-only text→id maps for every constant category.
///
/// Built once per worker from the store and never mutated afterwards.
#[derive(Debug, Default, Clone)]
pub struct LookupTables {
    maps: FxHashMap<ConstantKind, FxHashMap<String, i64>>,
    planetary_types: FxHashSet<i64>,
    commodities: FxHashSet<i64>,
    modules: FxHashSet<i64>,
}

impl LookupTables {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut tables = Self::default();
        for kind in ConstantKind::ALL {
            let rows = store::constant_rows(conn, kind)
                .with_context(|| format!("Failed to read constant table {}", kind.table()))?;
            for row in rows {
                tables.insert(kind, row.id, &row.text, row.eddn.as_deref());
            }
        }
        tables.planetary_types = store::planetary_station_types(conn)?;
        tables.commodities = store::known_ids(conn, "commodities")?;
        tables.modules = store::known_ids(conn, "modules")?;
        tables.apply_aliases();

        debug!(
            categories = tables.maps.len(),
            commodities = tables.commodities.len(),
            modules = tables.modules.len(),
            "Lookup tables loaded"
        );
        Ok(tables)
    }

    /// Tables straight from the fixed seed data, without a store.
    pub fn from_seed() -> Self {
        let mut tables = Self::default();
        for kind in ConstantKind::ALL {
            for seed in preload::seeds(kind) {
                tables.insert(kind, seed.id, seed.text, seed.eddn);
                if seed.planetary {
                    tables.planetary_types.insert(seed.id);
                }
            }
        }
        tables.apply_aliases();
        tables
    }

    /// First spelling registered for a text wins.
    fn insert(&mut self, kind: ConstantKind, id: i64, text: &str, eddn: Option<&str>) {
        let map = self.maps.entry(kind).or_default();
        map.entry(text.to_string()).or_insert(id);
        if let Some(eddn) = eddn {
            map.entry(eddn.to_string()).or_insert(id);
        }
    }

    fn apply_aliases(&mut self) {
        for (kind, alias, canonical) in ALIASES {
            if let Some(map) = self.maps.get_mut(kind) {
                if let Some(&id) = map.get(*canonical) {
                    map.entry(alias.to_string()).or_insert(id);
                }
            }
        }
    }

    pub fn id(&self, kind: ConstantKind, text: &str) -> Option<i64> {
        self.maps.get(&kind)?.get(text).copied()
    }

    /// Like [`id`](Self::id) but treats a missing text as a miss.
    pub fn id_opt(&self, kind: ConstantKind, text: Option<&str>) -> Option<i64> {
        text.and_then(|t| self.id(kind, t))
    }

    pub fn is_planetary(&self, station_type_id: i64) -> bool {
        self.planetary_types.contains(&station_type_id)
    }

    pub fn has_commodity(&self, commodity_id: i64) -> bool {
        self.commodities.contains(&commodity_id)
    }

    pub fn has_module(&self, module_id: i64) -> bool {
        self.modules.contains(&module_id)
    }

    pub fn with_commodities(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.commodities.extend(ids);
        self
    }

    pub fn with_modules(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.modules.extend(ids);
        self
    }
}
