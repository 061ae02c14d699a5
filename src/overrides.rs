//! Hand-maintained corrections applied to the store after each load.
//!
//! The dump carries a few faction attributes that are known to be wrong. They are
//! listed by faction name in `overrides.json` next to the registry maps:
//!
//! ```json
//! {"factions": {"Rana State Network": {"allegiance": "Empire"}}}
//! ```

use crate::config::OVERRIDES_FILE;
use crate::lookup::{ConstantKind, LookupTables};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactionOverride {
    pub allegiance: Option<String>,
    pub government: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Overrides {
    #[serde(default)]
    pub factions: BTreeMap<String, FactionOverride>,
}

/// One faction correction with its texts already resolved to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOverride {
    pub faction: String,
    pub allegiance_id: Option<i64>,
    pub government_id: Option<i64>,
}

pub fn overrides_path(dir: &Path) -> PathBuf {
    dir.join(OVERRIDES_FILE)
}

impl Overrides {
    /// A missing file means no overrides.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = overrides_path(dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let file =
            File::open(&path).with_context(|| format!("Failed to open overrides: {:?}", path))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse overrides: {:?}", path))
    }

    pub fn is_empty(&self) -> bool {
        self.factions.is_empty()
    }

    /// Resolves every text against the lookups. An unknown text fails the whole set.
    pub fn resolve(&self, lookups: &LookupTables) -> Result<Vec<ResolvedOverride>> {
        self.factions
            .iter()
            .map(|(faction, o)| {
                Ok(ResolvedOverride {
                    faction: faction.clone(),
                    allegiance_id: resolve_text(
                        lookups,
                        ConstantKind::Allegiance,
                        faction,
                        o.allegiance.as_deref(),
                    )?,
                    government_id: resolve_text(
                        lookups,
                        ConstantKind::Government,
                        faction,
                        o.government.as_deref(),
                    )?,
                })
            })
            .collect()
    }
}

fn resolve_text(
    lookups: &LookupTables,
    kind: ConstantKind,
    faction: &str,
    text: Option<&str>,
) -> Result<Option<i64>> {
    let Some(text) = text else {
        return Ok(None);
    };
    match lookups.id(kind, text) {
        Some(id) => Ok(Some(id)),
        None => bail!("Override for {faction:?} names unknown {} {text:?}", kind.table()),
    }
}

/// Applies the corrections in one transaction. Returns the faction rows changed.
pub fn apply(conn: &mut Connection, overrides: &[ResolvedOverride]) -> Result<usize> {
    let tx = conn.transaction().context("Failed to begin overrides transaction")?;
    let mut changed = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE factions SET allegiance_id = COALESCE(?2, allegiance_id),
                government_id = COALESCE(?3, government_id)
             WHERE name = ?1",
        )?;
        for o in overrides {
            let rows = stmt
                .execute(params![o.faction, o.allegiance_id, o.government_id])
                .with_context(|| format!("Failed to apply override for {:?}", o.faction))?;
            if rows == 0 {
                warn!(faction = %o.faction, "Override names a faction that is not stored");
            }
            changed += rows;
        }
    }
    tx.commit().context("Failed to commit overrides")?;

    info!(factions = changed, "Manual overrides applied");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(Overrides::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn load_and_resolve() {
        let dir = TempDir::new().unwrap();
        fs::write(
            overrides_path(dir.path()),
            r#"{"factions":{"Rana State Network":{"allegiance":"Empire"}}}"#,
        )
        .unwrap();

        let resolved = Overrides::load(dir.path())
            .unwrap()
            .resolve(&LookupTables::from_seed())
            .unwrap();
        assert_eq!(
            resolved,
            vec![ResolvedOverride {
                faction: "Rana State Network".to_string(),
                allegiance_id: Some(2),
                government_id: None,
            }]
        );
    }

    #[test]
    fn unknown_text_is_an_error() {
        let overrides = Overrides {
            factions: BTreeMap::from([(
                "Rana State Network".to_string(),
                FactionOverride {
                    allegiance: Some("Kingdom".to_string()),
                    government: None,
                },
            )]),
        };
        assert!(overrides.resolve(&LookupTables::from_seed()).is_err());
    }

    #[test]
    fn unknown_field_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            overrides_path(dir.path()),
            r#"{"factions":{"Rana State Network":{"alegiance":"Empire"}}}"#,
        )
        .unwrap();
        assert!(Overrides::load(dir.path()).is_err());
    }

    #[test]
    fn apply_updates_only_named_fields() {
        let mut conn = store::open_in_memory().unwrap();
        store::create_tables(&conn).unwrap();
        store::preload_reference_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO factions (id, name, allegiance_id, government_id, state_id, updated_at)
             VALUES (1, 'Rana State Network', 4, 64, 80, 0)",
            [],
        )
        .unwrap();

        let changed = apply(
            &mut conn,
            &[
                ResolvedOverride {
                    faction: "Rana State Network".to_string(),
                    allegiance_id: Some(2),
                    government_id: None,
                },
                ResolvedOverride {
                    faction: "Nobody".to_string(),
                    allegiance_id: Some(3),
                    government_id: None,
                },
            ],
        )
        .unwrap();
        assert_eq!(changed, 1);

        let (allegiance, government): (i64, i64) = conn
            .query_row(
                "SELECT allegiance_id, government_id FROM factions WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((allegiance, government), (2, 64));
    }
}
