use crate::config::LOAD_PROGRESS_INTERVAL;
use crate::models::{
    CommodityPricingRecord, EntityKind, FactionRecord, FactionStateRecord, InfluenceRecord,
    ModuleSaleRecord, StateKind, StationEconomyRecord, StationFeatureRecord, StationRecord,
    SystemRecord,
};
use crate::store;
use crate::writer::{merged_file, Records};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::{params, params_from_iter, Connection, Statement, Transaction};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Loads one category inside the step's transaction. Returns the rows applied.
pub type LoadFn = fn(&Transaction<'_>, &Path, &ProgressBar) -> Result<u64>;

/// One entry of the load order.
#[derive(Clone, Copy)]
pub struct LoadStep {
    pub name: &'static str,
    /// Merged file the step reads, `None` for the reference preload.
    pub kind: Option<EntityKind>,
    pub load: LoadFn,
}

/// Later steps hold foreign keys into earlier ones. Each step commits before the next starts.
pub const LOAD_ORDER: &[LoadStep] = &[
    LoadStep {
        name: "reference",
        kind: None,
        load: load_reference,
    },
    LoadStep {
        name: "factions",
        kind: Some(EntityKind::Factions),
        load: load_factions,
    },
    LoadStep {
        name: "systems",
        kind: Some(EntityKind::Systems),
        load: load_systems,
    },
    LoadStep {
        name: "influences",
        kind: Some(EntityKind::Influences),
        load: load_influences,
    },
    LoadStep {
        name: "faction_states",
        kind: Some(EntityKind::FactionStates),
        load: load_faction_states,
    },
    LoadStep {
        name: "stations",
        kind: Some(EntityKind::Stations),
        load: load_stations,
    },
    LoadStep {
        name: "station_features",
        kind: Some(EntityKind::Features),
        load: load_features,
    },
    LoadStep {
        name: "station_economies",
        kind: Some(EntityKind::Economies),
        load: load_economies,
    },
    LoadStep {
        name: "commodity_pricing",
        kind: Some(EntityKind::CommodityPricing),
        load: load_commodity_pricing,
    },
    LoadStep {
        name: "modules_sold",
        kind: Some(EntityKind::ModulesSold),
        load: load_modules_sold,
    },
];

const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "ed_system_address",
    "name",
    "population",
    "needs_permit",
    "allegiance_id",
    "government_id",
    "power_id",
    "power_state_id",
    "security_id",
    "primary_economy_id",
    "secondary_economy_id",
    "controlling_minor_faction_id",
    "x",
    "y",
    "z",
    "updated_at",
];

const STATION_COLUMNS: &[&str] = &[
    "id",
    "ed_market_id",
    "name",
    "system_id",
    "type_id",
    "controlling_minor_faction_id",
    "distance_to_star",
    "max_landing_pad_size",
    "is_planetary",
    "updated_at",
];

const FEATURE_COLUMNS: &[&str] = &[
    "id",
    "apexinterstellar",
    "blackmarket",
    "carriermanagement",
    "carriervendor",
    "commodities",
    "dock",
    "engineer",
    "interstellar_factors",
    "market",
    "materialtrader",
    "outfitting",
    "rearm",
    "refuel",
    "repair",
    "shipyard",
    "techbroker",
    "universal_cartographics",
];

/// Runs `steps` in order, one transaction each.
///
/// A failing step stops the load. Steps that already committed stay committed.
pub fn run_load(
    conn: &mut Connection,
    dir: &Path,
    steps: &[LoadStep],
) -> Result<Vec<(&'static str, u64)>> {
    let mut loaded = Vec::with_capacity(steps.len());

    for step in steps {
        let start = Instant::now();
        let pb = make_spinner(&format!("Loading {} ...", step.name));

        let tx = conn
            .transaction()
            .with_context(|| format!("Failed to begin {} transaction", step.name))?;
        let rows = (step.load)(&tx, dir, &pb)
            .with_context(|| format!("Failed to load {}", step.name))?;
        tx.commit()
            .with_context(|| format!("Failed to commit {}", step.name))?;

        pb.finish_with_message(format!("{}: {rows} rows", step.name));
        info!(
            step = step.name,
            rows,
            duration_secs = start.elapsed().as_secs_f64(),
            "Load step complete"
        );
        loaded.push((step.name, rows));
    }

    Ok(loaded)
}

/// `INSERT ... ON CONFLICT(key) DO UPDATE` over `columns`.
fn upsert_sql(table: &str, columns: &[&str], key: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !key.contains(*c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    let conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT({}) {conflict}",
        columns.join(", "),
        placeholders.join(", "),
        key.join(", ")
    )
}

/// Streams the merged file of `kind` through `apply`, ticking the progress bar.
fn upsert_records<T, F>(
    tx: &Transaction<'_>,
    dir: &Path,
    kind: EntityKind,
    sql: &str,
    pb: &ProgressBar,
    mut apply: F,
) -> Result<u64>
where
    T: DeserializeOwned,
    F: FnMut(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
{
    let mut stmt = tx.prepare(sql)?;
    let mut rows = 0u64;
    for record in Records::<T, _>::open(&merged_file(dir, kind))? {
        let record = record?;
        apply(&mut stmt, &record)?;
        rows += 1;
        if rows % LOAD_PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} rows", rows));
        }
    }
    Ok(rows)
}

fn load_reference(tx: &Transaction<'_>, _dir: &Path, _pb: &ProgressBar) -> Result<u64> {
    Ok(store::seed_empty_tables(tx)? as u64)
}

fn load_factions(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql(
        "factions",
        &["id", "name", "allegiance_id", "government_id", "state_id", "updated_at"],
        &["id"],
    );
    upsert_records(tx, dir, EntityKind::Factions, &sql, pb, |stmt, f: &FactionRecord| {
        stmt.execute(params![
            f.id,
            f.name,
            f.allegiance_id,
            f.government_id,
            f.state_id,
            f.updated_at
        ])
    })
}

fn load_systems(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql("systems", SYSTEM_COLUMNS, &["id"]);
    upsert_records(tx, dir, EntityKind::Systems, &sql, pb, |stmt, s: &SystemRecord| {
        stmt.execute(params![
            s.id,
            s.ed_system_address,
            s.name,
            s.population,
            s.needs_permit,
            s.allegiance_id,
            s.government_id,
            s.power_id,
            s.power_state_id,
            s.security_id,
            s.primary_economy_id,
            s.secondary_economy_id,
            s.controlling_minor_faction_id,
            s.x,
            s.y,
            s.z,
            s.updated_at
        ])
    })
}

fn load_influences(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql(
        "influence",
        &[
            "system_id",
            "faction_id",
            "influence",
            "is_controlling_faction",
            "updated_at",
        ],
        &["system_id", "faction_id"],
    );
    upsert_records(tx, dir, EntityKind::Influences, &sql, pb, |stmt, i: &InfluenceRecord| {
        stmt.execute(params![
            i.system_id,
            i.faction_id,
            i.influence,
            i.is_controlling_faction,
            i.updated_at
        ])
    })
}

/// Routes each state row to the table of its kind.
fn load_faction_states(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    const STATE_COLUMNS: &[&str] = &["system_id", "faction_id", "state_id"];
    let state_sql = |kind: StateKind| upsert_sql(kind.table(), STATE_COLUMNS, STATE_COLUMNS);
    let mut active = tx.prepare(&state_sql(StateKind::Active))?;
    let mut pending = tx.prepare(&state_sql(StateKind::Pending))?;
    let mut recovering = tx.prepare(&state_sql(StateKind::Recovering))?;

    let mut rows = 0u64;
    let path = merged_file(dir, EntityKind::FactionStates);
    for record in Records::<FactionStateRecord, _>::open(&path)? {
        let s = record?;
        let stmt = match s.kind {
            StateKind::Active => &mut active,
            StateKind::Pending => &mut pending,
            StateKind::Recovering => &mut recovering,
        };
        stmt.execute(params![s.system_id, s.faction_id, s.state_id])?;
        rows += 1;
        if rows % LOAD_PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} rows", rows));
        }
    }
    Ok(rows)
}

fn load_stations(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql("stations", STATION_COLUMNS, &["id"]);
    upsert_records(tx, dir, EntityKind::Stations, &sql, pb, |stmt, s: &StationRecord| {
        stmt.execute(params![
            s.id,
            s.ed_market_id,
            s.name,
            s.system_id,
            s.type_id,
            s.controlling_minor_faction_id,
            s.distance_to_star,
            s.max_landing_pad_size.as_str(),
            s.is_planetary,
            s.updated_at
        ])
    })
}

fn load_features(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql("station_features", FEATURE_COLUMNS, &["id"]);
    upsert_records(tx, dir, EntityKind::Features, &sql, pb, |stmt, f: &StationFeatureRecord| {
        let values = std::iter::once(f.id).chain(f.flags().into_iter().map(i64::from));
        stmt.execute(params_from_iter(values))
    })
}

fn load_economies(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql(
        "station_economies",
        &["id", "economy_id", "is_primary", "proportion"],
        &["id", "economy_id"],
    );
    upsert_records(tx, dir, EntityKind::Economies, &sql, pb, |stmt, e: &StationEconomyRecord| {
        stmt.execute(params![e.id, e.economy_id, e.primary, e.proportion])
    })
}

fn load_commodity_pricing(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql(
        "commodity_pricing",
        &[
            "station_id",
            "commodity_id",
            "demand",
            "supply",
            "buy_price",
            "sell_price",
        ],
        &["station_id", "commodity_id"],
    );
    upsert_records(
        tx,
        dir,
        EntityKind::CommodityPricing,
        &sql,
        pb,
        |stmt, c: &CommodityPricingRecord| {
            stmt.execute(params![
                c.station_id,
                c.commodity_id,
                c.demand,
                c.supply,
                c.buy_price,
                c.sell_price
            ])
        },
    )
}

fn load_modules_sold(tx: &Transaction<'_>, dir: &Path, pb: &ProgressBar) -> Result<u64> {
    let sql = upsert_sql(
        "modules_sold",
        &["station_id", "module_id"],
        &["station_id", "module_id"],
    );
    upsert_records(tx, dir, EntityKind::ModulesSold, &sql, pb, |stmt, m: &ModuleSaleRecord| {
        stmt.execute(params![m.station_id, m.module_id])
    })
}

fn make_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_prefix(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PadSize, StationFeatureRecord};
    use crate::writer::JsonArrayWriter;
    use serde::Serialize;
    use std::fs::File;
    use tempfile::TempDir;

    fn write_merged<T: Serialize>(dir: &Path, kind: EntityKind, records: &[T]) {
        let mut writer = JsonArrayWriter::new(File::create(merged_file(dir, kind)).unwrap()).unwrap();
        for r in records {
            writer.write(r).unwrap();
        }
        writer.finish().unwrap();
    }

    fn scratch_with_one_station() -> TempDir {
        let dir = TempDir::new().unwrap();
        let d = dir.path();
        for kind in EntityKind::ALL.iter().filter(|k| k.is_loadable()) {
            write_merged::<SystemRecord>(d, *kind, &[]);
        }
        write_merged(
            d,
            EntityKind::Factions,
            &[FactionRecord {
                id: 1,
                name: "Mother Gaia".into(),
                allegiance_id: Some(3),
                government_id: Some(96),
                state_id: Some(80),
                updated_at: 10,
            }],
        );
        write_merged(
            d,
            EntityKind::Systems,
            &[SystemRecord {
                id: 1,
                ed_system_address: Some(10477373803),
                name: "Sol".into(),
                population: Some(22780919531),
                needs_permit: true,
                allegiance_id: Some(3),
                government_id: Some(96),
                power_id: None,
                power_state_id: None,
                security_id: Some(48),
                primary_economy_id: Some(7),
                secondary_economy_id: None,
                controlling_minor_faction_id: Some(1),
                x: 0.0,
                y: 0.0,
                z: 0.0,
                updated_at: 10,
            }],
        );
        write_merged(
            d,
            EntityKind::Influences,
            &[InfluenceRecord {
                system_id: 1,
                faction_id: 1,
                influence: 0.6,
                is_controlling_faction: true,
                updated_at: 10,
            }],
        );
        write_merged(
            d,
            EntityKind::FactionStates,
            &[
                FactionStateRecord {
                    system_id: 1,
                    faction_id: 1,
                    state_id: 16,
                    kind: StateKind::Active,
                },
                FactionStateRecord {
                    system_id: 1,
                    faction_id: 1,
                    state_id: 65,
                    kind: StateKind::Pending,
                },
            ],
        );
        write_merged(
            d,
            EntityKind::Stations,
            &[StationRecord {
                id: 5,
                ed_market_id: Some(128016640),
                name: "Galileo".into(),
                system_id: 1,
                type_id: 7,
                controlling_minor_faction_id: Some(1),
                distance_to_star: Some(505.0),
                max_landing_pad_size: PadSize::L,
                is_planetary: false,
                updated_at: 10,
            }],
        );
        let mut features = StationFeatureRecord::new(5);
        features.dock = true;
        features.refuel = true;
        write_merged(d, EntityKind::Features, &[features]);
        write_merged(
            d,
            EntityKind::Economies,
            &[StationEconomyRecord {
                id: 5,
                economy_id: 7,
                primary: true,
                proportion: Some(1.0),
            }],
        );
        dir
    }

    fn fresh_store() -> Connection {
        let conn = store::open_in_memory().unwrap();
        store::create_tables(&conn).unwrap();
        conn
    }

    fn step(name: &str) -> &'static LoadStep {
        LOAD_ORDER.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn documented_order_loads() {
        let dir = scratch_with_one_station();
        let mut conn = fresh_store();

        let loaded = run_load(&mut conn, dir.path(), LOAD_ORDER).unwrap();
        let names: Vec<&str> = loaded.iter().map(|(n, _)| *n).collect();
        assert_eq!(names[..3], ["reference", "factions", "systems"]);

        assert_eq!(store::row_count(&conn, "stations").unwrap(), 1);
        assert_eq!(store::state_row_count(&conn, StateKind::Active).unwrap(), 1);
        assert_eq!(store::state_row_count(&conn, StateKind::Pending).unwrap(), 1);
        let (dock, shipyard): (bool, bool) = conn
            .query_row("SELECT dock, shipyard FROM station_features WHERE id = 5", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert!(dock);
        assert!(!shipyard);
    }

    #[test]
    fn stations_before_systems_fails() {
        let dir = scratch_with_one_station();
        let mut conn = fresh_store();
        let reordered = [
            *step("reference"),
            *step("factions"),
            *step("stations"),
            *step("systems"),
        ];

        let err = run_load(&mut conn, dir.path(), &reordered).unwrap_err();
        assert!(format!("{err:#}").contains("stations"));
        // Steps before the failure stay committed
        assert_eq!(store::row_count(&conn, "factions").unwrap(), 1);
        assert_eq!(store::row_count(&conn, "stations").unwrap(), 0);
    }

    #[test]
    fn loading_twice_upserts() {
        let dir = scratch_with_one_station();
        let mut conn = fresh_store();
        run_load(&mut conn, dir.path(), LOAD_ORDER).unwrap();
        run_load(&mut conn, dir.path(), LOAD_ORDER).unwrap();
        assert_eq!(store::row_count(&conn, "systems").unwrap(), 1);
        assert_eq!(store::row_count(&conn, "influence").unwrap(), 1);
    }

    #[test]
    fn every_loadable_kind_has_one_step() {
        for kind in EntityKind::ALL.iter().filter(|k| k.is_loadable()) {
            let steps = LOAD_ORDER.iter().filter(|s| s.kind == Some(*kind)).count();
            assert_eq!(steps, 1, "{kind:?}");
        }
    }

    #[test]
    fn upsert_sql_shapes() {
        assert_eq!(
            upsert_sql("modules_sold", &["station_id", "module_id"], &["station_id", "module_id"]),
            "INSERT INTO modules_sold (station_id, module_id) VALUES (?1, ?2) ON CONFLICT(station_id, module_id) DO NOTHING"
        );
        assert!(upsert_sql("factions", &["id", "name"], &["id"])
            .ends_with("ON CONFLICT(id) DO UPDATE SET name = excluded.name"));
    }
}
