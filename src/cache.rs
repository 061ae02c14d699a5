use crate::config::CACHE_VERSION;
use crate::index::DumpIndex;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    pub dump_path: String,
    pub dump_mtime: u64,
    pub dump_size: u64,
    pub system_count: usize,
    pub faction_count: usize,
    pub station_count: usize,
}

#[derive(Deserialize)]
struct IndexCacheDe {
    metadata: CacheMetadata,
    index: DumpIndex,
}

/// Borrows the index to avoid cloning every name during serialization.
#[derive(Serialize)]
struct IndexCacheSer<'a> {
    metadata: CacheMetadata,
    index: &'a DumpIndex,
}

pub fn cache_path(dir: &Path) -> PathBuf {
    dir.join("dump-index.cache")
}

fn get_dump_metadata(dump_path: &Path) -> Result<(u64, u64)> {
    let metadata = fs::metadata(dump_path)
        .with_context(|| format!("Failed to get metadata for: {:?}", dump_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    let size = metadata.len();
    Ok((mtime, size))
}

/// Returns `Ok(Some(index))` if the cache is valid, `Ok(None)` if missing or stale.
pub fn try_load_index(cache_path: &Path, dump_path: &Path) -> Result<Option<DumpIndex>> {
    if !cache_path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);

    let file = File::open(cache_path).context("Failed to open cache file")?;
    let reader = BufReader::with_capacity(256 * 1024, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let cache: IndexCacheDe = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Cache file is corrupt or unreadable");
            return Ok(None);
        }
    };

    if cache.metadata.version != CACHE_VERSION {
        info!(
            cached = cache.metadata.version,
            current = CACHE_VERSION,
            "Cache version mismatch"
        );
        return Ok(None);
    }

    let current = dump_path.to_string_lossy();
    if cache.metadata.dump_path != current {
        info!(
            cached = cache.metadata.dump_path,
            current = %current,
            "Cache dump path mismatch"
        );
        return Ok(None);
    }

    let (mtime, size) = get_dump_metadata(dump_path)?;
    if cache.metadata.dump_mtime != mtime || cache.metadata.dump_size != size {
        info!(
            cached_mtime = cache.metadata.dump_mtime,
            current_mtime = mtime,
            cached_size = cache.metadata.dump_size,
            current_size = size,
            "Dump has changed since cache was created"
        );
        return Ok(None);
    }

    info!(
        systems = cache.metadata.system_count,
        factions = cache.metadata.faction_count,
        stations = cache.metadata.station_count,
        "Name index loaded from cache"
    );

    Ok(Some(cache.index))
}

/// Serializes the index by reference and writes atomically via rename.
pub fn save_index(index: &DumpIndex, dump_path: &Path, dir: &Path) -> Result<()> {
    let path = cache_path(dir);

    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;

    let (mtime, size) = get_dump_metadata(dump_path)?;

    let cache = IndexCacheSer {
        metadata: CacheMetadata {
            version: CACHE_VERSION,
            dump_path: dump_path.to_string_lossy().to_string(),
            dump_mtime: mtime,
            dump_size: size,
            system_count: index.names.systems.len(),
            faction_count: index.names.factions.len(),
            station_count: index.names.stations.len(),
        },
        index,
    };

    let tmp_path = path.with_extension("cache.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp cache file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    bincode::DefaultOptions::new()
        .serialize_into(writer, &cache)
        .context("Failed to serialize name index cache")?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("Failed to rename temp cache file to: {:?}", path))?;

    info!(
        systems = cache.metadata.system_count,
        path = ?path,
        "Name index cache saved"
    );

    Ok(())
}

/// Cached index when still valid, otherwise a fresh scan that is then cached.
pub fn load_or_build(dump_path: &Path, dir: &Path) -> Result<DumpIndex> {
    if let Some(index) = try_load_index(&cache_path(dir), dump_path)? {
        return Ok(index);
    }
    info!("Building name index (cache miss or invalid)");

    let index = DumpIndex::build(dump_path)?;
    if let Err(e) = save_index(&index, dump_path, dir) {
        warn!(error = %e, "Failed to save name index cache");
    }
    Ok(index)
}
