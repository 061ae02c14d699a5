//! SQLite store: connection setup, schema, table resets and reference data reads.
//!
//! Foreign keys are enforced on every connection, so rows must be written in
//! dependency order (see [`crate::import::LOAD_ORDER`]).

use crate::lookup::{ConstantKind, ConstantRow};
use crate::models::StateKind;
use crate::preload;
use crate::registry::{station_key, NameCategory};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const CONNECTION_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;
"#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS allegiance (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS powers (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS power_state (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS economies (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS security (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS faction_state (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS gov_type (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS station_type (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT,
  is_planetary INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ships (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS commodity_groups (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS module_groups (
  id INTEGER PRIMARY KEY,
  text TEXT NOT NULL,
  eddn TEXT
);

CREATE TABLE IF NOT EXISTS commodities (
  id INTEGER PRIMARY KEY,
  group_id INTEGER REFERENCES commodity_groups(id),
  name TEXT NOT NULL,
  symbol TEXT
);

CREATE TABLE IF NOT EXISTS modules (
  id INTEGER PRIMARY KEY,
  group_id INTEGER REFERENCES module_groups(id),
  ship_id INTEGER REFERENCES ships(id),
  name TEXT NOT NULL,
  symbol TEXT,
  mod_class INTEGER NOT NULL DEFAULT 1,
  rating TEXT
);

CREATE TABLE IF NOT EXISTS factions (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  allegiance_id INTEGER REFERENCES allegiance(id),
  government_id INTEGER REFERENCES gov_type(id),
  state_id INTEGER REFERENCES faction_state(id),
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS systems (
  id INTEGER PRIMARY KEY,
  ed_system_address INTEGER,
  name TEXT NOT NULL,
  population INTEGER,
  needs_permit INTEGER NOT NULL DEFAULT 0,
  allegiance_id INTEGER REFERENCES allegiance(id),
  government_id INTEGER REFERENCES gov_type(id),
  power_id INTEGER REFERENCES powers(id),
  power_state_id INTEGER REFERENCES power_state(id),
  security_id INTEGER REFERENCES security(id),
  primary_economy_id INTEGER REFERENCES economies(id),
  secondary_economy_id INTEGER REFERENCES economies(id),
  controlling_minor_faction_id INTEGER REFERENCES factions(id),
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS influence (
  system_id INTEGER NOT NULL REFERENCES systems(id),
  faction_id INTEGER NOT NULL REFERENCES factions(id),
  influence REAL NOT NULL,
  is_controlling_faction INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (system_id, faction_id)
);

CREATE TABLE IF NOT EXISTS faction_active_states (
  system_id INTEGER NOT NULL REFERENCES systems(id),
  faction_id INTEGER NOT NULL REFERENCES factions(id),
  state_id INTEGER NOT NULL REFERENCES faction_state(id),
  PRIMARY KEY (system_id, faction_id, state_id)
);

CREATE TABLE IF NOT EXISTS faction_pending_states (
  system_id INTEGER NOT NULL REFERENCES systems(id),
  faction_id INTEGER NOT NULL REFERENCES factions(id),
  state_id INTEGER NOT NULL REFERENCES faction_state(id),
  PRIMARY KEY (system_id, faction_id, state_id)
);

CREATE TABLE IF NOT EXISTS faction_recovering_states (
  system_id INTEGER NOT NULL REFERENCES systems(id),
  faction_id INTEGER NOT NULL REFERENCES factions(id),
  state_id INTEGER NOT NULL REFERENCES faction_state(id),
  PRIMARY KEY (system_id, faction_id, state_id)
);

CREATE TABLE IF NOT EXISTS stations (
  id INTEGER PRIMARY KEY,
  ed_market_id INTEGER,
  name TEXT NOT NULL,
  system_id INTEGER NOT NULL REFERENCES systems(id),
  type_id INTEGER NOT NULL REFERENCES station_type(id),
  controlling_minor_faction_id INTEGER REFERENCES factions(id),
  distance_to_star REAL,
  max_landing_pad_size TEXT NOT NULL,
  is_planetary INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS station_features (
  id INTEGER PRIMARY KEY REFERENCES stations(id),
  apexinterstellar INTEGER NOT NULL DEFAULT 0,
  blackmarket INTEGER NOT NULL DEFAULT 0,
  carriermanagement INTEGER NOT NULL DEFAULT 0,
  carriervendor INTEGER NOT NULL DEFAULT 0,
  commodities INTEGER NOT NULL DEFAULT 0,
  dock INTEGER NOT NULL DEFAULT 0,
  engineer INTEGER NOT NULL DEFAULT 0,
  interstellar_factors INTEGER NOT NULL DEFAULT 0,
  market INTEGER NOT NULL DEFAULT 0,
  materialtrader INTEGER NOT NULL DEFAULT 0,
  outfitting INTEGER NOT NULL DEFAULT 0,
  rearm INTEGER NOT NULL DEFAULT 0,
  refuel INTEGER NOT NULL DEFAULT 0,
  repair INTEGER NOT NULL DEFAULT 0,
  shipyard INTEGER NOT NULL DEFAULT 0,
  techbroker INTEGER NOT NULL DEFAULT 0,
  universal_cartographics INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS station_economies (
  id INTEGER NOT NULL REFERENCES stations(id),
  economy_id INTEGER NOT NULL REFERENCES economies(id),
  is_primary INTEGER NOT NULL,
  proportion REAL,
  PRIMARY KEY (id, economy_id)
);

CREATE TABLE IF NOT EXISTS commodity_pricing (
  station_id INTEGER NOT NULL REFERENCES stations(id),
  commodity_id INTEGER NOT NULL REFERENCES commodities(id),
  demand INTEGER NOT NULL,
  supply INTEGER NOT NULL,
  buy_price INTEGER NOT NULL,
  sell_price INTEGER NOT NULL,
  PRIMARY KEY (station_id, commodity_id)
);

CREATE TABLE IF NOT EXISTS modules_sold (
  station_id INTEGER NOT NULL REFERENCES stations(id),
  module_id INTEGER NOT NULL REFERENCES modules(id),
  PRIMARY KEY (station_id, module_id)
);

CREATE INDEX IF NOT EXISTS idx_stations_system ON stations(system_id);
CREATE INDEX IF NOT EXISTS idx_influence_faction ON influence(faction_id);
"#;

/// Every table in creation order. Dropping walks it backwards.
const ALL_TABLES: &[&str] = &[
    "allegiance",
    "powers",
    "power_state",
    "economies",
    "security",
    "faction_state",
    "gov_type",
    "station_type",
    "ships",
    "commodity_groups",
    "module_groups",
    "commodities",
    "modules",
    "factions",
    "systems",
    "influence",
    "faction_active_states",
    "faction_pending_states",
    "faction_recovering_states",
    "stations",
    "station_features",
    "station_economies",
    "commodity_pricing",
    "modules_sold",
];

/// Tables rewritten by every load, in reverse dependency order.
pub const ENTITY_TABLES: &[&str] = &[
    "modules_sold",
    "commodity_pricing",
    "station_economies",
    "station_features",
    "stations",
    "faction_recovering_states",
    "faction_pending_states",
    "faction_active_states",
    "influence",
    "systems",
    "factions",
];

pub fn open(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open database: {:?}", path))?;
    configure(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(CONNECTION_PRAGMAS)
        .context("Failed to configure database connection")?;
    conn.busy_timeout(Duration::from_secs(30))?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Failed to create tables")?;
    Ok(())
}

/// Drops every table, reference tables included, and creates them again.
pub fn recreate_tables(conn: &Connection) -> Result<()> {
    for table in ALL_TABLES.iter().rev() {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
            .with_context(|| format!("Failed to drop table {table}"))?;
    }
    info!(tables = ALL_TABLES.len(), "Tables dropped");
    create_tables(conn)
}

/// Deletes all entity rows in one transaction. Reference tables are kept.
pub fn empty_tables(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    for table in ENTITY_TABLES {
        let removed = tx
            .execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("Failed to empty table {table}"))?;
        debug!(table, removed, "Table emptied");
    }
    tx.commit().context("Failed to commit table reset")?;
    info!(tables = ENTITY_TABLES.len(), "Entity tables emptied");
    Ok(())
}

/// Fills each seeded reference table that is still empty, in one transaction.
pub fn preload_reference_tables(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let inserted = seed_empty_tables(&tx)?;
    tx.commit().context("Failed to commit reference preload")?;
    Ok(inserted)
}

/// Seeds every empty reference table on the current connection or transaction.
/// Returns the rows inserted.
pub fn seed_empty_tables(conn: &Connection) -> Result<usize> {
    let mut inserted = 0;

    for kind in ConstantKind::ALL {
        let seeds = preload::seeds(kind);
        if seeds.is_empty() || row_count(conn, kind.table())? > 0 {
            continue;
        }

        if kind == ConstantKind::StationType {
            let mut stmt = conn.prepare(
                "INSERT INTO station_type (id, text, eddn, is_planetary) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for seed in seeds {
                stmt.execute(params![seed.id, seed.text, seed.eddn, seed.planetary])?;
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "INSERT INTO {} (id, text, eddn) VALUES (?1, ?2, ?3)",
                kind.table()
            ))?;
            for seed in seeds {
                stmt.execute(params![seed.id, seed.text, seed.eddn])?;
            }
        }
        debug!(table = kind.table(), rows = seeds.len(), "Reference table preloaded");
        inserted += seeds.len();
    }

    if inserted > 0 {
        info!(rows = inserted, "Reference tables preloaded");
    }
    Ok(inserted)
}

pub fn constant_rows(conn: &Connection, kind: ConstantKind) -> Result<Vec<ConstantRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, text, eddn FROM {} ORDER BY id",
        kind.table()
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ConstantRow {
                id: row.get(0)?,
                text: row.get(1)?,
                eddn: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn planetary_station_types(conn: &Connection) -> Result<FxHashSet<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM station_type WHERE is_planetary != 0")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<FxHashSet<i64>>>()?;
    Ok(ids)
}

/// Primary keys of a single-key table.
pub fn known_ids(conn: &Connection, table: &str) -> Result<FxHashSet<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {table}"))?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<FxHashSet<i64>>>()
        .with_context(|| format!("Failed to read ids of {table}"))?;
    Ok(ids)
}

/// Registry keys and ids of the entities already stored for `category`.
pub fn registered_names(conn: &Connection, category: NameCategory) -> Result<Vec<(String, i64)>> {
    let names = match category {
        NameCategory::System => name_id_pairs(conn, "SELECT name, id FROM systems ORDER BY id")?,
        NameCategory::Faction => name_id_pairs(conn, "SELECT name, id FROM factions ORDER BY id")?,
        NameCategory::Station => {
            let mut stmt = conn.prepare(
                "SELECT sy.name, st.name, t.text, st.id
                 FROM stations st
                 JOIN systems sy ON sy.id = st.system_id
                 JOIN station_type t ON t.id = st.type_id
                 ORDER BY st.id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let system: String = row.get(0)?;
                    let station: String = row.get(1)?;
                    let station_type: String = row.get(2)?;
                    Ok((
                        station_key(&system, &station, Some(station_type.as_str())),
                        row.get(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };
    Ok(names)
}

fn name_id_pairs(conn: &Connection, sql: &str) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Group ids keyed by text. Known groups keep their id and unknown ones are numbered
/// above the current maximum, in the order given.
pub fn assign_group_ids(
    conn: &Connection,
    kind: ConstantKind,
    names: &[&str],
) -> Result<FxHashMap<String, i64>> {
    let table = kind.table();
    let known: FxHashMap<String, i64> =
        name_id_pairs(conn, &format!("SELECT text, id FROM {table} ORDER BY id"))?
            .into_iter()
            .collect();
    let mut next = known.values().max().copied().unwrap_or(0) + 1;

    let mut insert = conn.prepare(&format!("INSERT INTO {table} (id, text) VALUES (?1, ?2)"))?;
    let mut ids = FxHashMap::default();
    for &name in names {
        let id = match known.get(name) {
            Some(&id) => id,
            None => {
                insert
                    .execute(params![next, name])
                    .with_context(|| format!("Failed to store {table} row {next}"))?;
                next += 1;
                next - 1
            }
        };
        ids.insert(name.to_string(), id);
    }
    Ok(ids)
}

/// Deletes the groups no row of `items_table` points at.
pub fn prune_groups(conn: &Connection, kind: ConstantKind, items_table: &str) -> Result<usize> {
    let table = kind.table();
    let removed = conn
        .execute(
            &format!(
                "DELETE FROM {table} WHERE id NOT IN
                 (SELECT group_id FROM {items_table} WHERE group_id IS NOT NULL)"
            ),
            [],
        )
        .with_context(|| format!("Failed to prune {table}"))?;
    if removed > 0 {
        debug!(table, removed, "Pruned unused groups");
    }
    Ok(removed)
}

pub fn row_count(conn: &Connection, table: &str) -> Result<u64> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows of {table}"))?;
    Ok(count as u64)
}

/// Row count of the table holding faction states of one kind.
pub fn state_row_count(conn: &Connection, kind: StateKind) -> Result<u64> {
    row_count(conn, kind.table())
}
