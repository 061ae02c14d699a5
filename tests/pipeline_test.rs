//! End-to-end tests for the galaxy import pipeline.
//!
//! Each test writes a small dump into its own TempDir and runs the whole pipeline
//! against a fresh SQLite file: registry maintenance, workers, merge and load.
//!
//! # Sample Data
//!
//! - 3 systems: Sol, Rana, Achenar
//! - Sol's only station is controlled by a faction absent from Sol's faction list,
//!   so the load must include a stub faction for it
//! - Mother Gaia is present in two systems and must be loaded once
//! - One malformed line and the array brackets of a pretty-printed dump

use galaxy_etl::overrides::overrides_path;
use galaxy_etl::pipeline::{self, Launcher, PipelineConfig};
use galaxy_etl::registry::{read_map, NameCategory, NameRegistry};
use galaxy_etl::store;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn sample_dump() -> &'static str {
    r#"[
{"name":"Sol","id64":10477373803,"coords":{"x":0,"y":0,"z":0},"population":22780919531,"allegiance":"Federation","government":"Democracy","controllingFaction":{"name":"Mother Gaia"},"date":"2024-01-15 10:30:00+00","factions":[{"name":"Mother Gaia","allegiance":"Federation","government":"Democracy","influence":0.6,"state":"None"}],"stations":[{"name":"Galileo","id":128016640,"type":"Coriolis Starport","controllingFaction":"Federal Navy","allegiance":"Federation","government":"Democracy","services":["Market","Outfitting","Shipyard"],"landingPads":{"large":4,"medium":8,"small":12},"market":{"commodities":[{"commodityId":128049202,"name":"Hydrogen Fuel","symbol":"HydrogenFuel","category":"Chemicals","demand":0,"supply":500,"buyPrice":80,"sellPrice":75}]},"outfitting":{"modules":[{"moduleId":128049250,"name":"Pulse Laser","category":"hardpoint","class":1,"rating":"F"}]},"updateTime":"2024-01-15 10:00:00+00"}]},
{"name":"Rana","id64":121,"coords":{"x":1,"y":2,"z":3},"date":"2024-01-14 08:00:00+00","factions":[{"name":"Rana State Network","allegiance":"Independent","government":"Corporate","influence":0.5},{"name":"Mother Gaia","allegiance":"Federation","government":"Democracy","influence":0.4}]},
this line is not json,
{"name":"Achenar","coords":{"x":67.5,"y":-119.5,"z":24.8}},
]
"#
}

fn setup(dir: &TempDir) -> PipelineConfig {
    let dump = dir.path().join("galaxy.json");
    fs::write(&dump, sample_dump()).unwrap();
    PipelineConfig {
        dump,
        db: dir.path().join("galaxy.sqlite"),
        registry_dir: dir.path().join("registry"),
        scratch_dir: dir.path().join("scratch"),
        jobs: 2,
        refresh_ids: true,
        refresh_caches: true,
        include_market: true,
        recreate_tables: false,
        skip_load: false,
        cleanup: true,
        seed_registry: false,
        launcher: Launcher::Threads,
    }
}

fn count(db: &Path, table: &str) -> u64 {
    let conn = store::open(db).unwrap();
    store::row_count(&conn, table).unwrap()
}

fn assert_sample_loaded(db: &Path) {
    assert_eq!(count(db, "systems"), 3);
    // Mother Gaia once, Rana State Network, and the Federal Navy stub
    assert_eq!(count(db, "factions"), 3);
    assert_eq!(count(db, "influence"), 3);
    assert_eq!(count(db, "stations"), 1);
    assert_eq!(count(db, "station_features"), 1);
    assert_eq!(count(db, "commodity_pricing"), 1);
    assert_eq!(count(db, "modules_sold"), 1);
}

#[test]
fn full_import_with_threads() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);

    let summary = pipeline::run(&config).unwrap();
    assert_eq!(summary.workers, 2);
    assert_eq!(summary.counts.systems, 3);
    assert_eq!(summary.counts.malformed_lines, 1);
    assert_eq!(summary.counts.stubs, 1);
    let merge = summary.merge.as_ref().unwrap();
    assert_eq!(merge.factions.written, 3);
    assert_eq!(merge.factions.duplicates, 1);
    assert_eq!(summary.loaded.len(), 10);

    assert_sample_loaded(&config.db);

    let systems = read_map(&NameCategory::System.map_path(&config.registry_dir)).unwrap();
    assert_eq!(
        systems.into_iter().collect::<Vec<_>>(),
        vec![
            ("Achenar".to_string(), 1),
            ("Rana".to_string(), 2),
            ("Sol".to_string(), 3)
        ]
    );
}

#[test]
fn loaded_rows_use_registry_ids() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    let registry = NameRegistry::load(&config.registry_dir).unwrap();
    let sol = registry.get(NameCategory::System, "Sol").unwrap();
    let gaia = registry.get(NameCategory::Faction, "Mother Gaia").unwrap();
    let navy = registry.get(NameCategory::Faction, "Federal Navy").unwrap();

    let conn = store::open(&config.db).unwrap();
    let controller: Option<i64> = conn
        .query_row(
            "SELECT controlling_minor_faction_id FROM systems WHERE id = ?1",
            [sol],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(controller, Some(gaia));

    let (station_system, station_faction): (i64, Option<i64>) = conn
        .query_row(
            "SELECT system_id, controlling_minor_faction_id FROM stations WHERE name = 'Galileo'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(station_system, sol);
    assert_eq!(station_faction, Some(navy));

    let gaia_presence: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM influence WHERE faction_id = ?1",
            [gaia],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(gaia_presence, 2);
}

#[test]
fn second_import_is_stable() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();
    let systems_before = fs::read(NameCategory::System.map_path(&config.registry_dir)).unwrap();

    let config = PipelineConfig {
        refresh_ids: false,
        refresh_caches: false,
        jobs: 3,
        ..config
    };
    let summary = pipeline::run(&config).unwrap();
    assert!(summary.registry.is_empty());
    assert_eq!(summary.workers, 3);

    assert_sample_loaded(&config.db);
    let systems_after = fs::read(NameCategory::System.map_path(&config.registry_dir)).unwrap();
    assert_eq!(systems_before, systems_after);
}

#[test]
fn recreate_tables_reloads_from_scratch() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    let config = PipelineConfig {
        recreate_tables: true,
        ..config
    };
    pipeline::run(&config).unwrap();
    assert_sample_loaded(&config.db);
}

#[test]
fn market_rows_are_opt_in() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        include_market: false,
        ..setup(&dir)
    };
    pipeline::run(&config).unwrap();

    assert_eq!(count(&config.db, "stations"), 1);
    assert_eq!(count(&config.db, "commodity_pricing"), 0);
    assert_eq!(count(&config.db, "modules_sold"), 0);
}

#[test]
fn scratch_files_are_removed_but_index_cache_is_kept() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    let summary = pipeline::run(&config).unwrap();
    assert!(summary.scratch_removed > 0);

    let left: Vec<String> = fs::read_dir(&config.scratch_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(left, vec!["dump-index.cache".to_string()]);
}

#[test]
fn no_cleanup_keeps_intermediate_files() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        cleanup: false,
        ..setup(&dir)
    };
    pipeline::run(&config).unwrap();

    assert!(config.scratch_dir.join("systems.json").exists());
    assert!(config.scratch_dir.join("systems.00.json").exists());
    assert!(config.scratch_dir.join("report.01.bin").exists());
}

#[test]
fn skip_only_maintains_the_registry() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        skip_load: true,
        ..setup(&dir)
    };
    let summary = pipeline::run(&config).unwrap();

    assert_eq!(summary.workers, 0);
    assert!(summary.loaded.is_empty());
    assert!(NameRegistry::files_present(&config.registry_dir));
    assert_eq!(count(&config.db, "systems"), 0);
    assert_eq!(count(&config.db, "commodities"), 1);
}

#[test]
fn skip_keeps_rows_already_loaded() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    let config = PipelineConfig {
        skip_load: true,
        refresh_ids: false,
        ..config
    };
    pipeline::run(&config).unwrap();
    assert_sample_loaded(&config.db);
}

fn import_command(config: &PipelineConfig) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_galaxy-etl"));
    cmd.arg("import")
        .arg("-i")
        .arg(&config.dump)
        .arg("--db")
        .arg(&config.db)
        .arg("--registry-dir")
        .arg(&config.registry_dir)
        .arg("--scratch-dir")
        .arg(&config.scratch_dir)
        .arg("--threads")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

#[test]
fn cli_skip_runs_without_prompt_and_keeps_rows() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    let status = import_command(&config).arg("-k").status().unwrap();
    assert!(status.success());
    assert_sample_loaded(&config.db);
}

#[test]
fn cli_recreate_with_skip_is_refused_without_confirmation() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    // No answer on stdin declines the prompt
    let status = import_command(&config).args(["-r", "-k"]).status().unwrap();
    assert!(!status.success());
    assert_sample_loaded(&config.db);
}

fn faction_allegiance(db: &Path, name: &str) -> i64 {
    let conn = store::open(db).unwrap();
    conn.query_row(
        "SELECT allegiance_id FROM factions WHERE name = ?1",
        [name],
        |r| r.get(0),
    )
    .unwrap()
}

#[test]
fn overrides_are_reapplied_after_every_load() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    fs::create_dir_all(&config.registry_dir).unwrap();
    fs::write(
        overrides_path(&config.registry_dir),
        r#"{"factions":{"Rana State Network":{"allegiance":"Empire"}}}"#,
    )
    .unwrap();

    let summary = pipeline::run(&config).unwrap();
    assert_eq!(summary.overridden, 1);
    assert_eq!(faction_allegiance(&config.db, "Rana State Network"), 2);
    assert_eq!(faction_allegiance(&config.db, "Mother Gaia"), 3);

    let config = PipelineConfig {
        refresh_ids: false,
        ..config
    };
    pipeline::run(&config).unwrap();
    assert_eq!(faction_allegiance(&config.db, "Rana State Network"), 2);
}

#[test]
fn bad_override_fails_before_loading() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    fs::write(
        overrides_path(&config.registry_dir),
        r#"{"factions":{"Rana State Network":{"allegiance":"Kingdom"}}}"#,
    )
    .unwrap();
    let summary = pipeline::run(&PipelineConfig {
        refresh_ids: false,
        ..config.clone()
    });
    assert!(summary.is_err());
    assert_sample_loaded(&config.db);
    assert_eq!(faction_allegiance(&config.db, "Rana State Network"), 4);
}

#[test]
fn failed_workers_leave_the_store_untouched() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    pipeline::run(&config).unwrap();

    let broken = PipelineConfig {
        dump: dir.path().join("missing.json"),
        refresh_ids: false,
        refresh_caches: false,
        ..config.clone()
    };
    assert!(pipeline::run(&broken).is_err());
    assert_sample_loaded(&config.db);
}

#[test]
fn full_import_with_worker_processes() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        launcher: Launcher::Processes {
            exe: env!("CARGO_BIN_EXE_galaxy-etl").into(),
            verbosity: 0,
        },
        ..setup(&dir)
    };

    let summary = pipeline::run(&config).unwrap();
    assert_eq!(summary.workers, 2);
    assert_sample_loaded(&config.db);
}
