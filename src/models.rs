use serde::{Deserialize, Serialize};

/// Entity categories produced by the transform pass, one intermediate file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Systems,
    Factions,
    Influences,
    FactionStates,
    Stations,
    Features,
    Economies,
    CommodityPricing,
    ModulesSold,
    ControllingFactions,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Systems,
        EntityKind::Factions,
        EntityKind::Influences,
        EntityKind::FactionStates,
        EntityKind::Stations,
        EntityKind::Features,
        EntityKind::Economies,
        EntityKind::CommodityPricing,
        EntityKind::ModulesSold,
        EntityKind::ControllingFactions,
    ];

    pub fn file_stem(self) -> &'static str {
        match self {
            EntityKind::Systems => "systems",
            EntityKind::Factions => "factions",
            EntityKind::Influences => "influences",
            EntityKind::FactionStates => "faction_states",
            EntityKind::Stations => "stations",
            EntityKind::Features => "station_features",
            EntityKind::Economies => "station_economies",
            EntityKind::CommodityPricing => "commodity_pricing",
            EntityKind::ModulesSold => "modules_sold",
            EntityKind::ControllingFactions => "controlling_factions",
        }
    }

    /// Stub factions are folded into `Factions` by the merge and never loaded directly.
    pub fn is_loadable(self) -> bool {
        self != EntityKind::ControllingFactions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    pub id: i64,
    pub ed_system_address: Option<i64>,
    pub name: String,
    pub population: Option<i64>,
    pub needs_permit: bool,
    pub allegiance_id: Option<i64>,
    pub government_id: Option<i64>,
    pub power_id: Option<i64>,
    pub power_state_id: Option<i64>,
    pub security_id: Option<i64>,
    pub primary_economy_id: Option<i64>,
    pub secondary_economy_id: Option<i64>,
    pub controlling_minor_faction_id: Option<i64>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionRecord {
    pub id: i64,
    pub name: String,
    pub allegiance_id: Option<i64>,
    pub government_id: Option<i64>,
    pub state_id: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceRecord {
    pub system_id: i64,
    pub faction_id: i64,
    pub influence: f64,
    pub is_controlling_faction: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Active,
    Pending,
    Recovering,
}

impl StateKind {
    pub fn table(self) -> &'static str {
        match self {
            StateKind::Active => "faction_active_states",
            StateKind::Pending => "faction_pending_states",
            StateKind::Recovering => "faction_recovering_states",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionStateRecord {
    pub system_id: i64,
    pub faction_id: i64,
    pub state_id: i64,
    pub kind: StateKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadSize {
    S,
    M,
    L,
}

impl PadSize {
    pub fn as_str(self) -> &'static str {
        match self {
            PadSize::S => "S",
            PadSize::M => "M",
            PadSize::L => "L",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: i64,
    pub ed_market_id: Option<i64>,
    pub name: String,
    pub system_id: i64,
    pub type_id: i64,
    pub controlling_minor_faction_id: Option<i64>,
    pub distance_to_star: Option<f64>,
    pub max_landing_pad_size: PadSize,
    pub is_planetary: bool,
    pub updated_at: i64,
}

/// Services a station can offer. Each maps to one flag of [`StationFeatureRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    ApexInterstellar,
    BlackMarket,
    CarrierManagement,
    CarrierVendor,
    Commodities,
    Dock,
    Engineer,
    InterstellarFactors,
    Market,
    MaterialTrader,
    Outfitting,
    Rearm,
    Refuel,
    Repair,
    Shipyard,
    TechBroker,
    UniversalCartographics,
}

/// Fixed-shape service flags. Every flag starts `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationFeatureRecord {
    pub id: i64,
    pub apexinterstellar: bool,
    pub blackmarket: bool,
    pub carriermanagement: bool,
    pub carriervendor: bool,
    pub commodities: bool,
    pub dock: bool,
    pub engineer: bool,
    pub interstellar_factors: bool,
    pub market: bool,
    pub materialtrader: bool,
    pub outfitting: bool,
    pub rearm: bool,
    pub refuel: bool,
    pub repair: bool,
    pub shipyard: bool,
    pub techbroker: bool,
    pub universal_cartographics: bool,
}

impl StationFeatureRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn set(&mut self, feature: Feature) {
        let flag = match feature {
            Feature::ApexInterstellar => &mut self.apexinterstellar,
            Feature::BlackMarket => &mut self.blackmarket,
            Feature::CarrierManagement => &mut self.carriermanagement,
            Feature::CarrierVendor => &mut self.carriervendor,
            Feature::Commodities => &mut self.commodities,
            Feature::Dock => &mut self.dock,
            Feature::Engineer => &mut self.engineer,
            Feature::InterstellarFactors => &mut self.interstellar_factors,
            Feature::Market => &mut self.market,
            Feature::MaterialTrader => &mut self.materialtrader,
            Feature::Outfitting => &mut self.outfitting,
            Feature::Rearm => &mut self.rearm,
            Feature::Refuel => &mut self.refuel,
            Feature::Repair => &mut self.repair,
            Feature::Shipyard => &mut self.shipyard,
            Feature::TechBroker => &mut self.techbroker,
            Feature::UniversalCartographics => &mut self.universal_cartographics,
        };
        *flag = true;
    }

    /// Flags in column order, for the loader.
    pub fn flags(&self) -> [bool; 17] {
        [
            self.apexinterstellar,
            self.blackmarket,
            self.carriermanagement,
            self.carriervendor,
            self.commodities,
            self.dock,
            self.engineer,
            self.interstellar_factors,
            self.market,
            self.materialtrader,
            self.outfitting,
            self.rearm,
            self.refuel,
            self.repair,
            self.shipyard,
            self.techbroker,
            self.universal_cartographics,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationEconomyRecord {
    pub id: i64,
    pub economy_id: i64,
    pub primary: bool,
    pub proportion: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityPricingRecord {
    pub station_id: i64,
    pub commodity_id: i64,
    pub demand: i64,
    pub supply: i64,
    pub buy_price: i64,
    pub sell_price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSaleRecord {
    pub station_id: i64,
    pub module_id: i64,
}

/// A faction's presence in one system: its record, influence and flattened states.
#[derive(Debug, Clone, PartialEq)]
pub struct FactionPresence {
    pub faction: FactionRecord,
    pub influence: InfluenceRecord,
    pub states: Vec<FactionStateRecord>,
}

/// All rows derived from one station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationBundle {
    pub station: StationRecord,
    pub features: StationFeatureRecord,
    pub economies: Vec<StationEconomyRecord>,
    pub commodity_pricing: Vec<CommodityPricingRecord>,
    pub modules_sold: Vec<ModuleSaleRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnregisteredFaction,
    UnknownStationType,
    UnregisteredStation,
    UnknownCommodity,
    UnknownModule,
}

/// A nested item dropped while transforming an otherwise valid system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub reason: SkipReason,
    pub name: String,
}

/// Every row produced from one dump line.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    pub system: SystemRecord,
    pub factions: Vec<FactionPresence>,
    pub stations: Vec<StationBundle>,
    pub stubs: Vec<FactionRecord>,
    pub skipped: Vec<Skipped>,
}
