use crate::lookup::ConstantKind;
use crate::parser::{RawCommodity, RawModule, RawStation};
use crate::store;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Group assigned to items the dump lists without a category.
const UNCATEGORIZED: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityDef {
    pub id: i64,
    pub name: String,
    pub symbol: Option<String>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub id: i64,
    pub name: String,
    pub symbol: Option<String>,
    pub category: String,
    pub class: Option<i64>,
    pub rating: Option<String>,
    pub ship: Option<String>,
}

/// Commodity and module definitions seen in station markets and outfitting.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub commodities: BTreeMap<i64, CommodityDef>,
    pub modules: BTreeMap<i64, ModuleDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    pub commodity_groups: usize,
    pub commodities: usize,
    pub module_groups: usize,
    pub modules: usize,
}

impl Catalog {
    /// First definition seen for an id wins.
    pub fn observe_station(&mut self, station: &RawStation) {
        if let Some(market) = &station.market {
            for commodity in &market.commodities {
                self.commodities
                    .entry(commodity.commodity_id)
                    .or_insert_with(|| commodity_def(commodity));
            }
        }
        if let Some(outfitting) = &station.outfitting {
            for module in &outfitting.modules {
                self.modules
                    .entry(module.module_id)
                    .or_insert_with(|| module_def(module));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commodities.is_empty() && self.modules.is_empty()
    }

    /// Distinct commodity categories in name order.
    pub fn commodity_groups(&self) -> Vec<&str> {
        distinct(self.commodities.values().map(|c| c.category.as_str()))
    }

    /// Distinct module categories in name order.
    pub fn module_groups(&self) -> Vec<&str> {
        distinct(self.modules.values().map(|m| m.category.as_str()))
    }

    /// Upserts groups, commodities and modules in one transaction.
    ///
    /// Groups are matched by text, so a group keeps its id across refreshes. Groups
    /// that no commodity or module uses any more are deleted.
    pub fn store(&self, conn: &mut Connection) -> Result<CatalogSummary> {
        let ships: FxHashMap<String, i64> = store::constant_rows(conn, ConstantKind::Ship)?
            .into_iter()
            .flat_map(|row| {
                let eddn = row.eddn.map(|e| (e, row.id));
                std::iter::once((row.text, row.id)).chain(eddn)
            })
            .collect();

        let commodity_groups = self.commodity_groups();
        let module_groups = self.module_groups();

        let tx = conn.transaction().context("Failed to begin catalog transaction")?;
        let commodity_group_ids =
            store::assign_group_ids(&tx, ConstantKind::CommodityGroup, &commodity_groups)?;
        let module_group_ids =
            store::assign_group_ids(&tx, ConstantKind::ModuleGroup, &module_groups)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO commodities (id, group_id, name, symbol) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET group_id = excluded.group_id,
                    name = excluded.name, symbol = excluded.symbol",
            )?;
            for c in self.commodities.values() {
                stmt.execute(params![
                    c.id,
                    commodity_group_ids.get(c.category.as_str()),
                    c.name,
                    c.symbol
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO modules (id, group_id, ship_id, name, symbol, mod_class, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET group_id = excluded.group_id,
                    ship_id = excluded.ship_id, name = excluded.name, symbol = excluded.symbol,
                    mod_class = excluded.mod_class, rating = excluded.rating",
            )?;
            for m in self.modules.values() {
                let ship_id = m.ship.as_deref().and_then(|s| ships.get(s));
                stmt.execute(params![
                    m.id,
                    module_group_ids.get(m.category.as_str()),
                    ship_id,
                    m.name,
                    m.symbol,
                    m.class.unwrap_or(1),
                    m.rating
                ])?;
            }
        }
        store::prune_groups(&tx, ConstantKind::CommodityGroup, "commodities")?;
        store::prune_groups(&tx, ConstantKind::ModuleGroup, "modules")?;
        tx.commit().context("Failed to commit catalog")?;

        let summary = CatalogSummary {
            commodity_groups: commodity_groups.len(),
            commodities: self.commodities.len(),
            module_groups: module_groups.len(),
            modules: self.modules.len(),
        };
        info!(
            commodities = summary.commodities,
            modules = summary.modules,
            "Commodity and module catalog stored"
        );
        Ok(summary)
    }
}

fn commodity_def(raw: &RawCommodity) -> CommodityDef {
    CommodityDef {
        id: raw.commodity_id,
        name: raw.name.clone(),
        symbol: raw.symbol.clone(),
        category: raw
            .category
            .clone()
            .unwrap_or_else(|| UNCATEGORIZED.to_string()),
    }
}

fn module_def(raw: &RawModule) -> ModuleDef {
    ModuleDef {
        id: raw.module_id,
        name: raw.name.clone(),
        symbol: raw.symbol.clone(),
        category: raw
            .category
            .clone()
            .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        class: raw.class,
        rating: raw.rating.clone(),
        ship: raw.ship.clone(),
    }
}

fn distinct<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    names.collect::<BTreeSet<_>>().into_iter().collect()
}
