//! Which products a run works on: everything, a tier file, a previous failures file or an
//! explicit SKU list. Also buckets missing products into difficulty tiers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{CatalogStore, ProductRecord};
use crate::ledger::{FailureLedger, FailureRecord};
use crate::normalization::text::fold_accents;
use crate::util::fs::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRules {
    pub accessory_sku_prefixes: Vec<String>,
    /// Franchise words that make a product easy to source.
    pub easy_keywords: Vec<String>,
    pub medium_sku_prefixes: Vec<String>,
}

impl Default for TierRules {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            accessory_sku_prefixes: strings(&["ACC"]),
            easy_keywords: strings(&[
                "zelda",
                "mario",
                "pokemon",
                "kirby",
                "donkey kong",
                "wii",
                "animal crossing",
                "metroid",
            ]),
            medium_sku_prefixes: strings(&["SW", "WII"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Easy,
    Medium,
    Hard,
    Accessories,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Easy, Tier::Medium, Tier::Hard, Tier::Accessories];

    pub fn file_name(&self) -> &'static str {
        match self {
            Tier::Easy => "TIER_1_EASY.json",
            Tier::Medium => "TIER_2_MEDIUM.json",
            Tier::Hard => "TIER_3_HARD.json",
            Tier::Accessories => "TIER_4_ACCESSORIES.json",
        }
    }
}

impl TierRules {
    pub fn classify(&self, product: &ProductRecord) -> Tier {
        let sku = product.sku.to_ascii_uppercase();
        let has_prefix =
            |prefixes: &[String]| prefixes.iter().any(|p| sku.starts_with(&p.to_ascii_uppercase()));
        if has_prefix(&self.accessory_sku_prefixes) {
            return Tier::Accessories;
        }
        let name = fold_accents(&product.name.to_lowercase());
        if self
            .easy_keywords
            .iter()
            .any(|k| name.contains(&fold_accents(&k.to_lowercase())))
        {
            return Tier::Easy;
        }
        if has_prefix(&self.medium_sku_prefixes) {
            return Tier::Medium;
        }
        Tier::Hard
    }
}

/// One line of a tier or selection file. Only `sku` is required when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierEntry {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub slug: String,
}

impl From<&ProductRecord> for TierEntry {
    fn from(p: &ProductRecord) -> Self {
        Self {
            sku: p.sku.clone(),
            name: p.name.clone(),
            platform: p.platform.clone(),
            slug: p.slug.clone(),
        }
    }
}

/// Every tier, in order, even when empty.
pub fn plan_tiers<'a>(
    products: impl IntoIterator<Item = &'a ProductRecord>,
    rules: &TierRules,
) -> IndexMap<Tier, Vec<TierEntry>> {
    let mut plan: IndexMap<Tier, Vec<TierEntry>> =
        Tier::ALL.iter().map(|t| (*t, Vec::new())).collect();
    for product in products {
        plan.entry(rules.classify(product))
            .or_default()
            .push(TierEntry::from(product));
    }
    plan
}

pub fn write_tier_files(dir: &Path, plan: &IndexMap<Tier, Vec<TierEntry>>) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (tier, entries) in plan {
        let path = dir.join(tier.file_name());
        let body = serde_json::to_vec_pretty(entries).context("serializing tier file")?;
        write_atomic(&path, &body).with_context(|| format!("writing {}", path.display()))?;
        info!(tier = ?tier, products = entries.len(), path = %path.display(), "tier file written");
        written.push(path);
    }
    Ok(written)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelection {
    All,
    TierFile(PathBuf),
    FailuresFile(PathBuf),
    Skus(Vec<String>),
}

impl BatchSelection {
    /// Products to process, in selection order without duplicates. SKUs that name no
    /// catalog record are recorded as catalog failures rather than aborting the run.
    pub fn select(&self, catalog: &CatalogStore, ledger: &FailureLedger) -> Result<Vec<ProductRecord>> {
        let wanted: Vec<(String, Option<String>)> = match self {
            BatchSelection::All => return Ok(catalog.products().to_vec()),
            BatchSelection::TierFile(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading tier file {}", path.display()))?;
                let entries: Vec<TierEntry> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing tier file {}", path.display()))?;
                entries
                    .into_iter()
                    .map(|e| (e.sku, Some(e.name).filter(|n| !n.is_empty())))
                    .collect()
            }
            BatchSelection::FailuresFile(path) => FailureLedger::load(path)?
                .into_iter()
                .map(|r| (r.sku, Some(r.name).filter(|n| !n.is_empty())))
                .collect(),
            BatchSelection::Skus(skus) => skus.iter().map(|s| (s.clone(), None)).collect(),
        };

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for (sku, name) in wanted {
            if !seen.insert(sku.clone()) {
                continue;
            }
            match catalog.get(&sku) {
                Some(product) => selected.push(product.clone()),
                None => {
                    warn!(sku = %sku, "selected sku is not in the catalog");
                    ledger.record(FailureRecord::orphan(&sku, name.as_deref()));
                }
            }
        }
        info!(selection = ?self, products = selected.len(), "batch selected");
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::test_support::product;

    #[test]
    fn classification_follows_prefixes_and_franchise_words() {
        let rules = TierRules::default();
        assert_eq!(rules.classify(&product("ACC-001", "Wii Remote", "Nintendo Wii")), Tier::Accessories);
        assert_eq!(rules.classify(&product("GB-003", "Pokémon Red", "Game Boy")), Tier::Easy);
        assert_eq!(rules.classify(&product("SW-020", "Splatoon 2", "Nintendo Switch")), Tier::Medium);
        assert_eq!(rules.classify(&product("NES-010", "Ice Climber", "NES")), Tier::Hard);
    }

    #[test]
    fn tier_files_are_written_for_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let products = vec![
            product("SW-001", "Super Mario Odyssey", "Nintendo Switch"),
            product("NES-010", "Ice Climber", "NES"),
        ];
        let plan = plan_tiers(&products, &TierRules::default());
        let files = write_tier_files(dir.path(), &plan).unwrap();
        assert_eq!(files.len(), 4);
        let easy: Vec<TierEntry> =
            serde_json::from_slice(&std::fs::read(dir.path().join("TIER_1_EASY.json")).unwrap()).unwrap();
        assert_eq!(easy[0].sku, "SW-001");
        let medium = std::fs::read_to_string(dir.path().join("TIER_2_MEDIUM.json")).unwrap();
        assert_eq!(medium.trim(), "[]");
    }

    #[test]
    fn tier_file_selection_reports_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::from_records(
            &dir.path().join("products.json"),
            vec![product("SW-001", "Super Mario Odyssey", "Nintendo Switch")],
        )
        .unwrap();
        let tier = dir.path().join("TIER_1_EASY.json");
        std::fs::write(
            &tier,
            r#"[{"sku":"SW-001"},{"sku":"SW-001"},{"sku":"SW-999","name":"Ghost Game"}]"#,
        )
        .unwrap();
        let ledger = FailureLedger::new();
        let selected = BatchSelection::TierFile(tier).select(&catalog, &ledger).unwrap();
        assert_eq!(selected.len(), 1);
        let orphans = ledger.snapshot();
        assert_eq!(orphans[0].sku, "SW-999");
        assert_eq!(orphans[0].name, "Ghost Game");
        assert_eq!(orphans[0].kind, FailureKind::Catalog);
    }

    #[test]
    fn explicit_skus_and_failure_files_select_by_sku() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::from_records(
            &dir.path().join("products.json"),
            vec![
                product("A", "Alpha Quest", "Nintendo Wii"),
                product("B", "Bravo Racing", "Nintendo Wii"),
            ],
        )
        .unwrap();
        let ledger = FailureLedger::new();
        let picked = BatchSelection::Skus(vec!["B".into()])
            .select(&catalog, &ledger)
            .unwrap();
        assert_eq!(picked[0].sku, "B");

        let failures = dir.path().join("failures.json");
        std::fs::write(
            &failures,
            r#"[{"sku":"A","name":"Alpha Quest","url":"https://x.test/a.jpg","reason":"HTTP 404"}]"#,
        )
        .unwrap();
        let retry = BatchSelection::FailuresFile(failures)
            .select(&catalog, &ledger)
            .unwrap();
        assert_eq!(retry[0].sku, "A");
        assert!(ledger.is_empty());
    }
}
