/// Separator between system and station names in station registry keys
pub const STATION_KEY_SEP: &str = "_";

/// Station types keyed by name alone (they hop between systems)
pub const CARRIER_TYPES: &[&str] = &["Drake-Class Carrier", "Fleet Carrier"];

/// Registry file stems (`<stem>.json` full map, `<stem>.new.json` delta)
pub const SYSTEM_MAP_STEM: &str = "systemMap";
pub const FACTION_MAP_STEM: &str = "factionMap";
pub const STATION_MAP_STEM: &str = "stationMap";

/// Manual faction corrections, kept beside the registry maps
pub const OVERRIDES_FILE: &str = "overrides.json";

/// Placeholder ids for stub factions when the naming station gives nothing better
pub const STUB_ALLEGIANCE_ID: i64 = 5;
pub const STUB_GOVERNMENT_ID: i64 = 176;
pub const STUB_STATE_ID: i64 = 80;

/// Progress update interval (log/tick every N dump lines)
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// Buffer size for intermediate file writers
pub const WRITER_BUFFER_SIZE: usize = 128 * 1024;

/// Buffer size for merge readers/writers
pub const MERGE_BUFFER_SIZE: usize = 256 * 1024;

/// Buffer size for reading the dump
pub const DUMP_BUFFER_SIZE: usize = 1024 * 1024;

/// Worker report format version
pub const REPORT_VERSION: u32 = 1;

/// Dump index cache format version
pub const CACHE_VERSION: u32 = 1;

/// Progress tick interval for load steps (rows)
pub const LOAD_PROGRESS_INTERVAL: u64 = 5_000;

/// Default worker count: one and a half per available core
pub fn default_jobs() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 3 / 2).max(1)
}
