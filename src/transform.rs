use crate::config::{STUB_ALLEGIANCE_ID, STUB_GOVERNMENT_ID, STUB_STATE_ID};
use crate::error::TransformError;
use crate::lookup::{ConstantKind, LookupTables};
use crate::models::{
    CommodityPricingRecord, FactionPresence, FactionRecord, FactionStateRecord, Feature,
    InfluenceRecord, ModuleSaleRecord, PadSize, SkipReason, Skipped, StateKind, StationBundle,
    StationEconomyRecord, StationFeatureRecord, StationRecord, SystemRecord, TransformResult,
};
use crate::parser::{parse_timestamp, NameRef, RawFaction, RawStation, RawSystem, StateEntry};
use crate::registry::{station_key, NameCategory, NameRegistry};
use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

/// Source service names and the feature flag each one sets.
static SERVICES: Lazy<FxHashMap<&'static str, Feature>> = Lazy::new(|| {
    [
        ("Apex Interstellar", Feature::ApexInterstellar),
        ("Black Market", Feature::BlackMarket),
        ("Fleet Carrier Management", Feature::CarrierManagement),
        ("Fleet Carrier Vendor", Feature::CarrierVendor),
        ("Commodities", Feature::Commodities),
        ("Dock", Feature::Dock),
        ("Docking", Feature::Dock),
        ("Engineer", Feature::Engineer),
        ("Interstellar Factors Contact", Feature::InterstellarFactors),
        ("Market", Feature::Market),
        ("Material Trader", Feature::MaterialTrader),
        ("Outfitting", Feature::Outfitting),
        ("Restock", Feature::Rearm),
        ("Rearm", Feature::Rearm),
        ("Refuel", Feature::Refuel),
        ("Repair", Feature::Repair),
        ("Shipyard", Feature::Shipyard),
        ("Technology Broker", Feature::TechBroker),
        ("Universal Cartographics", Feature::UniversalCartographics),
    ]
    .into_iter()
    .collect()
});

/// Read-only inputs shared by every record a worker transforms.
pub struct TransformContext<'a> {
    pub registry: &'a NameRegistry,
    pub lookups: &'a LookupTables,
    pub include_market: bool,
    /// Used when a record carries no parseable timestamp.
    pub fallback_time: i64,
}

/// Converts one dump system into entity rows.
///
/// Fails only when the system itself is unregistered. Unregistered factions and
/// stations, unknown station types and unknown market items are dropped and listed in
/// `skipped`.
pub fn transform_system(
    raw: &RawSystem,
    ctx: &TransformContext<'_>,
) -> Result<TransformResult, TransformError> {
    let system_id = ctx.registry.resolve(NameCategory::System, &raw.name)?;
    let lk = ctx.lookups;
    let updated_at = raw
        .date
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(ctx.fallback_time);

    let controlling_name = raw.controlling_faction.as_ref().map(NameRef::name);
    let controlling_id =
        controlling_name.and_then(|name| ctx.registry.get(NameCategory::Faction, name));

    let system = SystemRecord {
        id: system_id,
        ed_system_address: raw.id64,
        name: raw.name.clone(),
        population: raw.population,
        needs_permit: raw.needs_permit,
        allegiance_id: lk.id_opt(ConstantKind::Allegiance, raw.allegiance.as_deref()),
        government_id: lk.id_opt(ConstantKind::Government, raw.government.as_deref()),
        power_id: lk.id_opt(ConstantKind::Power, raw.controlling_power.as_deref()),
        power_state_id: lk.id_opt(ConstantKind::PowerState, raw.power_state.as_deref()),
        security_id: lk.id_opt(ConstantKind::Security, raw.security.as_deref()),
        primary_economy_id: lk.id_opt(ConstantKind::Economy, raw.primary_economy.as_deref()),
        secondary_economy_id: lk.id_opt(ConstantKind::Economy, raw.secondary_economy.as_deref()),
        controlling_minor_faction_id: controlling_id,
        x: raw.coords.x,
        y: raw.coords.y,
        z: raw.coords.z,
        updated_at,
    };

    let mut skipped = Vec::new();
    let mut factions = Vec::with_capacity(raw.factions.len());
    for faction in &raw.factions {
        match transform_faction(faction, system_id, controlling_id, updated_at, ctx) {
            Some(presence) => factions.push(presence),
            None => skipped.push(Skipped {
                reason: SkipReason::UnregisteredFaction,
                name: faction.name.clone(),
            }),
        }
    }

    let listed: FxHashSet<i64> = factions.iter().map(|p| p.faction.id).collect();
    let mut stubbed = FxHashSet::default();
    let mut stubs = Vec::new();

    if let (Some(name), Some(id)) = (controlling_name, controlling_id) {
        if !listed.contains(&id) && stubbed.insert(id) {
            stubs.push(stub_faction(
                id,
                name,
                raw.allegiance.as_deref(),
                raw.government.as_deref(),
                None,
                updated_at,
                lk,
            ));
        }
    }

    let mut stations = Vec::new();
    for station in raw.all_stations() {
        match transform_station(station, &raw.name, system_id, updated_at, ctx, &mut skipped) {
            Ok(bundle) => {
                if let (Some(name), Some(id)) = (
                    station.controlling_faction.as_ref().map(NameRef::name),
                    bundle.station.controlling_minor_faction_id,
                ) {
                    if !listed.contains(&id) && stubbed.insert(id) {
                        stubs.push(stub_faction(
                            id,
                            name,
                            station.allegiance.as_deref(),
                            station.government.as_deref(),
                            station.controlling_faction_state.as_deref(),
                            bundle.station.updated_at,
                            lk,
                        ));
                    }
                }
                stations.push(bundle);
            }
            Err(reason) => skipped.push(Skipped {
                reason,
                name: station.name.clone(),
            }),
        }
    }

    Ok(TransformResult {
        system,
        factions,
        stations,
        stubs,
        skipped,
    })
}

fn transform_faction(
    raw: &RawFaction,
    system_id: i64,
    controlling_id: Option<i64>,
    updated_at: i64,
    ctx: &TransformContext<'_>,
) -> Option<FactionPresence> {
    let id = ctx.registry.get(NameCategory::Faction, &raw.name)?;
    let lk = ctx.lookups;

    let faction = FactionRecord {
        id,
        name: raw.name.clone(),
        allegiance_id: lk.id_opt(ConstantKind::Allegiance, raw.allegiance.as_deref()),
        government_id: lk.id_opt(ConstantKind::Government, raw.government.as_deref()),
        state_id: lk.id_opt(ConstantKind::FactionState, raw.state.as_deref()),
        updated_at,
    };

    let influence = InfluenceRecord {
        system_id,
        faction_id: id,
        influence: raw.influence.unwrap_or(0.0),
        is_controlling_faction: controlling_id == Some(id),
        updated_at,
    };

    // A bare `state` is the active state when no explicit list is given.
    let active: Vec<&str> = if raw.active_states.is_empty() {
        raw.state.as_deref().into_iter().collect()
    } else {
        raw.active_states.iter().map(StateEntry::state).collect()
    };
    let pending: Vec<&str> = raw.pending_states.iter().map(StateEntry::state).collect();
    let recovering: Vec<&str> = raw.recovering_states.iter().map(StateEntry::state).collect();

    let mut states = Vec::new();
    for (kind, names) in [
        (StateKind::Active, active),
        (StateKind::Pending, pending),
        (StateKind::Recovering, recovering),
    ] {
        for name in names {
            let Some(state_id) = lk.id(ConstantKind::FactionState, name) else {
                continue;
            };
            let duplicate = states
                .iter()
                .any(|s: &FactionStateRecord| s.kind == kind && s.state_id == state_id);
            if !duplicate {
                states.push(FactionStateRecord {
                    system_id,
                    faction_id: id,
                    state_id,
                    kind,
                });
            }
        }
    }

    Some(FactionPresence {
        faction,
        influence,
        states,
    })
}

fn transform_station(
    raw: &RawStation,
    system_name: &str,
    system_id: i64,
    system_time: i64,
    ctx: &TransformContext<'_>,
    skipped: &mut Vec<Skipped>,
) -> Result<StationBundle, SkipReason> {
    let lk = ctx.lookups;
    let type_id = raw
        .station_type
        .as_deref()
        .and_then(|t| lk.id(ConstantKind::StationType, t))
        .ok_or(SkipReason::UnknownStationType)?;
    let key = station_key(system_name, &raw.name, raw.station_type.as_deref());
    let id = ctx
        .registry
        .get(NameCategory::Station, &key)
        .ok_or(SkipReason::UnregisteredStation)?;

    let updated_at = raw
        .update_time
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(system_time);

    let station = StationRecord {
        id,
        ed_market_id: raw.id,
        name: raw.name.clone(),
        system_id,
        type_id,
        controlling_minor_faction_id: raw
            .controlling_faction
            .as_ref()
            .and_then(|f| ctx.registry.get(NameCategory::Faction, f.name())),
        distance_to_star: raw.distance_to_arrival,
        max_landing_pad_size: landing_pad_size(raw.landing_pads.as_ref()),
        is_planetary: lk.is_planetary(type_id),
        updated_at,
    };

    let (commodity_pricing, modules_sold) = if ctx.include_market {
        (
            commodity_pricing(raw, id, lk, skipped),
            modules_sold(raw, id, lk, skipped),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(StationBundle {
        station,
        features: station_features(id, &raw.services),
        economies: station_economies(raw, id, lk),
        commodity_pricing,
        modules_sold,
    })
}

/// Largest pad present among `large`/`medium`, otherwise small.
pub fn landing_pad_size<V>(pads: Option<&BTreeMap<String, V>>) -> PadSize {
    match pads {
        Some(p) if p.contains_key("large") => PadSize::L,
        Some(p) if p.contains_key("medium") => PadSize::M,
        _ => PadSize::S,
    }
}

pub fn station_features(station_id: i64, services: &[String]) -> StationFeatureRecord {
    let mut features = StationFeatureRecord::new(station_id);
    for service in services {
        if let Some(&feature) = SERVICES.get(service.as_str()) {
            features.set(feature);
        }
    }
    features
}

fn station_economies(raw: &RawStation, station_id: i64, lk: &LookupTables) -> Vec<StationEconomyRecord> {
    let primary = raw.primary_economy.as_deref();

    if raw.economies.is_empty() {
        return lk
            .id_opt(ConstantKind::Economy, primary)
            .map(|economy_id| {
                vec![StationEconomyRecord {
                    id: station_id,
                    economy_id,
                    primary: true,
                    proportion: None,
                }]
            })
            .unwrap_or_default();
    }

    let mut economies: Vec<StationEconomyRecord> = Vec::with_capacity(raw.economies.len());
    for (name, proportion) in &raw.economies {
        let Some(economy_id) = lk.id(ConstantKind::Economy, name) else {
            continue;
        };
        if economies.iter().any(|e| e.economy_id == economy_id) {
            continue;
        }
        economies.push(StationEconomyRecord {
            id: station_id,
            economy_id,
            primary: primary == Some(name.as_str()),
            proportion: Some(*proportion),
        });
    }
    economies
}

fn commodity_pricing(
    raw: &RawStation,
    station_id: i64,
    lk: &LookupTables,
    skipped: &mut Vec<Skipped>,
) -> Vec<CommodityPricingRecord> {
    let Some(market) = &raw.market else {
        return Vec::new();
    };

    let mut seen = FxHashSet::default();
    let mut rows = Vec::with_capacity(market.commodities.len());
    for commodity in &market.commodities {
        if !lk.has_commodity(commodity.commodity_id) {
            skipped.push(Skipped {
                reason: SkipReason::UnknownCommodity,
                name: commodity.name.clone(),
            });
            continue;
        }
        if !seen.insert(commodity.commodity_id) {
            continue;
        }
        rows.push(CommodityPricingRecord {
            station_id,
            commodity_id: commodity.commodity_id,
            demand: commodity.demand.unwrap_or(0),
            supply: commodity.supply.unwrap_or(0),
            buy_price: commodity.buy_price.unwrap_or(0),
            sell_price: commodity.sell_price.unwrap_or(0),
        });
    }
    rows
}

fn modules_sold(
    raw: &RawStation,
    station_id: i64,
    lk: &LookupTables,
    skipped: &mut Vec<Skipped>,
) -> Vec<ModuleSaleRecord> {
    let Some(outfitting) = &raw.outfitting else {
        return Vec::new();
    };

    let mut seen = FxHashSet::default();
    let mut rows = Vec::with_capacity(outfitting.modules.len());
    for module in &outfitting.modules {
        if !lk.has_module(module.module_id) {
            skipped.push(Skipped {
                reason: SkipReason::UnknownModule,
                name: module.name.clone(),
            });
            continue;
        }
        if seen.insert(module.module_id) {
            rows.push(ModuleSaleRecord {
                station_id,
                module_id: module.module_id,
            });
        }
    }
    rows
}

/// Minimal faction record for a controlling faction never listed among system factions.
///
/// Attributes come from whatever named it, falling back to the fixed placeholder ids.
fn stub_faction(
    id: i64,
    name: &str,
    allegiance: Option<&str>,
    government: Option<&str>,
    state: Option<&str>,
    updated_at: i64,
    lk: &LookupTables,
) -> FactionRecord {
    FactionRecord {
        id,
        name: name.to_string(),
        allegiance_id: Some(
            lk.id_opt(ConstantKind::Allegiance, allegiance)
                .unwrap_or(STUB_ALLEGIANCE_ID),
        ),
        government_id: Some(
            lk.id_opt(ConstantKind::Government, government)
                .unwrap_or(STUB_GOVERNMENT_ID),
        ),
        state_id: Some(
            lk.id_opt(ConstantKind::FactionState, state)
                .unwrap_or(STUB_STATE_ID),
        ),
        updated_at,
    }
}
