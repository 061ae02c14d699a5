use crate::config::DUMP_BUFFER_SIZE;
use crate::error::DumpLineError;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A name given either as a bare string or as an object carrying `name`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NameRef {
    Name(String),
    Object { name: String },
}

impl NameRef {
    pub fn name(&self) -> &str {
        match self {
            NameRef::Name(name) | NameRef::Object { name } => name,
        }
    }
}

/// A faction state listed either as text or as `{"state": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StateEntry {
    Name(String),
    Object { state: String },
}

impl StateEntry {
    pub fn state(&self) -> &str {
        match self {
            StateEntry::Name(state) | StateEntry::Object { state } => state,
        }
    }
}

/// Reads an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One system line of the dump.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSystem {
    pub name: String,
    pub id64: Option<i64>,
    pub coords: Coords,
    pub population: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub needs_permit: bool,
    pub allegiance: Option<String>,
    pub government: Option<String>,
    pub primary_economy: Option<String>,
    pub secondary_economy: Option<String>,
    pub security: Option<String>,
    pub controlling_power: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub powers: Vec<String>,
    pub power_state: Option<String>,
    pub controlling_faction: Option<NameRef>,
    pub date: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub factions: Vec<RawFaction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stations: Vec<RawStation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bodies: Vec<RawBody>,
}

impl RawSystem {
    /// Top level stations followed by stations on bodies.
    pub fn all_stations(&self) -> impl Iterator<Item = &RawStation> {
        self.stations
            .iter()
            .chain(self.bodies.iter().flat_map(|b| b.stations.iter()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFaction {
    pub name: String,
    pub allegiance: Option<String>,
    pub government: Option<String>,
    pub influence: Option<f64>,
    pub state: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active_states: Vec<StateEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pending_states: Vec<StateEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recovering_states: Vec<StateEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBody {
    #[serde(default, deserialize_with = "null_as_default")]
    pub stations: Vec<RawStation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStation {
    pub name: String,
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub station_type: Option<String>,
    pub distance_to_arrival: Option<f64>,
    pub controlling_faction: Option<NameRef>,
    pub controlling_faction_state: Option<String>,
    pub allegiance: Option<String>,
    pub government: Option<String>,
    pub primary_economy: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub economies: BTreeMap<String, f64>,
    pub landing_pads: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<String>,
    pub market: Option<RawMarket>,
    pub outfitting: Option<RawOutfitting>,
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMarket {
    #[serde(default, deserialize_with = "null_as_default")]
    pub commodities: Vec<RawCommodity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOutfitting {
    #[serde(default, deserialize_with = "null_as_default")]
    pub modules: Vec<RawModule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawCommodity {
    pub commodity_id: i64,
    pub name: String,
    pub symbol: Option<String>,
    pub category: Option<String>,
    pub demand: Option<i64>,
    pub supply: Option<i64>,
    pub buy_price: Option<i64>,
    pub sell_price: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawModule {
    pub module_id: i64,
    pub name: String,
    pub symbol: Option<String>,
    pub category: Option<String>,
    pub class: Option<i64>,
    pub rating: Option<String>,
    pub ship: Option<String>,
}

pub fn open_dump(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open galaxy dump at: {:?}", path))?;
    Ok(BufReader::with_capacity(DUMP_BUFFER_SIZE, file))
}

/// Parses one physical dump line.
///
/// Array brackets and blank lines yield `Ok(None)`. A trailing comma (or anything
/// else after the closing brace) is cut before decoding.
pub fn parse_system_line(line: &[u8]) -> Result<Option<RawSystem>, DumpLineError> {
    let line = line.trim_ascii();
    match line.first() {
        None | Some(b'[') | Some(b']') => return Ok(None),
        Some(b'{') => {}
        Some(_) => return Err(DumpLineError::NotAnObject),
    }

    let end = memchr::memrchr(b'}', line).ok_or(DumpLineError::NotAnObject)?;
    let system = serde_json::from_slice(&line[..=end])?;
    Ok(Some(system))
}

/// Parses dump timestamps such as `2023-04-02 18:29:18+00` into UTC seconds.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
