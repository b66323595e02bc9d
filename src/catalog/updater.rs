use std::path::{Path, PathBuf};

use itertools::Itertools;
use tracing::{debug, info, warn};

use super::{AssetSide, CatalogStore, ProductRecord};
use crate::config::SpellingRule;
use crate::error::ResolveError;
use crate::pricing::PriceQuote;
use crate::util::fs::write_atomic;

/// Owns the mapping from slug to asset file and the only code path that mutates records.
#[derive(Debug, Clone)]
pub struct CatalogUpdater {
    asset_dir: PathBuf,
    public_prefix: String,
    extension: String,
    spellings: Vec<SpellingRule>,
}

impl CatalogUpdater {
    pub fn new(
        asset_dir: impl Into<PathBuf>,
        public_prefix: &str,
        extension: &str,
        spellings: Vec<SpellingRule>,
    ) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            spellings,
        }
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    pub fn file_name(&self, slug: &str, side: AssetSide) -> String {
        format!("{slug}{}.{}", side.stem_suffix(), self.extension)
    }

    pub fn asset_path(&self, slug: &str, side: AssetSide) -> PathBuf {
        self.asset_dir.join(self.file_name(slug, side))
    }

    /// Path stored in the catalog, relative to the public web root.
    pub fn public_path(&self, slug: &str, side: AssetSide) -> String {
        format!("{}/{}", self.public_prefix, self.file_name(slug, side))
    }

    /// Scratch file a raw download lands in before normalization. Kept out of the public
    /// listing by the leading dot.
    pub fn download_path(&self, slug: &str, side: AssetSide) -> PathBuf {
        self.asset_dir
            .join(".downloads")
            .join(format!("{slug}{}.part", side.stem_suffix()))
    }

    /// File the record's stored path names, looked up by file name inside `asset_dir`.
    pub fn stored_asset(&self, product: &ProductRecord, side: AssetSide) -> Option<PathBuf> {
        let stored = product.asset(side)?;
        let name = Path::new(stored).file_name()?;
        Some(self.asset_dir.join(name))
    }

    /// A side is done only when the record points at an asset file that exists. Checked
    /// before any resolution.
    pub fn is_resolved(&self, product: &ProductRecord, side: AssetSide) -> bool {
        self.stored_asset(product, side).is_some_and(|p| p.is_file())
    }

    /// Asset already written under the product's slug that the record does not point at,
    /// as left by a run interrupted between the write and the catalog save.
    pub fn unrecorded_asset(&self, product: &ProductRecord, side: AssetSide) -> Option<PathBuf> {
        if self.is_resolved(product, side) {
            return None;
        }
        let path = self.asset_path(&product.slug, side);
        path.is_file().then_some(path)
    }

    /// Slugs that name the same product under an alternate spelling.
    pub fn sibling_slugs(&self, slug: &str) -> Vec<String> {
        self.spellings
            .iter()
            .flat_map(|rule| {
                let mut out = Vec::new();
                if !rule.from.is_empty() && slug.contains(&rule.from) {
                    out.push(slug.replace(&rule.from, &rule.to));
                }
                if !rule.to.is_empty() && slug.contains(&rule.to) {
                    out.push(slug.replace(&rule.to, &rule.from));
                }
                out
            })
            .filter(|s| s != slug)
            .unique()
            .collect()
    }

    pub fn write_asset(
        &self,
        slug: &str,
        side: AssetSide,
        bytes: &[u8],
    ) -> Result<PathBuf, ResolveError> {
        let path = self.asset_path(slug, side);
        write_atomic(&path, bytes).map_err(|e| {
            ResolveError::catalog(slug, format!("writing asset {}: {e}", path.display()))
        })?;
        debug!(slug, side = %side, path = %path.display(), bytes = bytes.len(), "asset written");
        Ok(path)
    }

    /// Point the record (and any alternate-spelling siblings) at the asset just written.
    /// Returns the SKUs whose records changed.
    pub fn update(
        &self,
        catalog: &mut CatalogStore,
        sku: &str,
        side: AssetSide,
        asset_path: &Path,
    ) -> Result<Vec<String>, ResolveError> {
        let slug = catalog
            .get(sku)
            .map(|p| p.slug.clone())
            .ok_or_else(|| ResolveError::catalog(sku, "no catalog record for sku"))?;

        catalog.set_asset(sku, side, &self.public_path(&slug, side))?;
        let mut touched = vec![sku.to_string()];

        for sibling in self.sibling_slugs(&slug) {
            let target = self.asset_path(&sibling, side);
            if !target.exists() {
                let copied = std::fs::read(asset_path)
                    .and_then(|bytes| write_atomic(&target, &bytes));
                if let Err(e) = copied {
                    warn!(sku, sibling = %sibling, error = %e, "failed to copy asset to sibling slug");
                    continue;
                }
            }
            let sibling_sku = catalog.get_by_slug(&sibling).map(|p| p.sku.clone());
            if let Some(sibling_sku) = sibling_sku {
                catalog.set_asset(&sibling_sku, side, &self.public_path(&sibling, side))?;
                info!(sku, sibling_sku = %sibling_sku, sibling = %sibling, "asset propagated to alternate spelling");
                touched.push(sibling_sku);
            }
        }
        Ok(touched)
    }

    /// Write a resolved price into the record, converting minor to major units.
    pub fn apply_price(
        &self,
        catalog: &mut CatalogStore,
        quote: &PriceQuote,
    ) -> Result<(), ResolveError> {
        let record = catalog
            .get_mut(&quote.sku)
            .ok_or_else(|| ResolveError::catalog(&quote.sku, "no catalog record for sku"))?;
        record.trade_in_price = Some(minor_to_major(quote.trade_in));
        record.source_loose_price = quote.loose.map(minor_to_major);
        Ok(())
    }
}

fn minor_to_major(minor: i64) -> f64 {
    minor as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updater(dir: &Path) -> CatalogUpdater {
        CatalogUpdater::new(
            dir,
            "/images/products/",
            "jpg",
            vec![SpellingRule {
                from: "pokmon".to_string(),
                to: "pok-mon".to_string(),
            }],
        )
    }

    #[test]
    fn paths_are_derived_from_slug_and_side() {
        let u = updater(Path::new("/srv/assets"));
        assert_eq!(u.public_path("metroid-dread", AssetSide::Front), "/images/products/metroid-dread.jpg");
        assert_eq!(
            u.asset_path("metroid-dread", AssetSide::Back),
            PathBuf::from("/srv/assets/metroid-dread-back.jpg")
        );
    }

    #[test]
    fn sibling_slugs_apply_rules_both_ways() {
        let u = updater(Path::new("."));
        assert_eq!(u.sibling_slugs("pokmon-sword"), vec!["pok-mon-sword"]);
        assert_eq!(u.sibling_slugs("pok-mon-sword"), vec!["pokmon-sword"]);
        assert!(u.sibling_slugs("metroid-dread").is_empty());
    }

    #[test]
    fn update_propagates_to_sibling_records() {
        let dir = tempfile::tempdir().unwrap();
        let u = updater(dir.path());
        let mut catalog = CatalogStore::from_records(
            &dir.path().join("products.json"),
            vec![
                ProductRecord::new("SW-1", "pokmon-sword", "Pokémon Sword", "Nintendo Switch"),
                ProductRecord::new("SW-2", "pok-mon-sword", "Pokemon Sword", "Nintendo Switch"),
            ],
        )
        .unwrap();

        let written = u.write_asset("pokmon-sword", AssetSide::Front, b"jpeg-bytes").unwrap();
        let touched = u.update(&mut catalog, "SW-1", AssetSide::Front, &written).unwrap();

        assert_eq!(touched, vec!["SW-1", "SW-2"]);
        assert_eq!(
            catalog.get("SW-2").unwrap().image.as_deref(),
            Some("/images/products/pok-mon-sword.jpg")
        );
        assert_eq!(
            std::fs::read(dir.path().join("pok-mon-sword.jpg")).unwrap(),
            b"jpeg-bytes"
        );
        assert!(u.is_resolved(catalog.get("SW-2").unwrap(), AssetSide::Front));
    }

    #[test]
    fn resolution_follows_the_stored_path() {
        let dir = tempfile::tempdir().unwrap();
        let u = updater(dir.path());
        std::fs::write(dir.path().join("hand-picked.webp"), b"curated").unwrap();

        let mut curated = ProductRecord::new("WII-1", "wii-sports", "Wii Sports", "Nintendo Wii");
        curated.image = Some("/images/products/hand-picked.webp".to_string());
        assert!(u.is_resolved(&curated, AssetSide::Front));
        assert_eq!(u.unrecorded_asset(&curated, AssetSide::Front), None);
        assert!(!u.is_resolved(&curated, AssetSide::Back));

        let mut dangling = curated.clone();
        dangling.image = Some("/images/products/gone.jpg".to_string());
        assert!(!u.is_resolved(&dangling, AssetSide::Front));

        let written = u.write_asset("wii-sports", AssetSide::Front, b"jpeg-bytes").unwrap();
        let bare = ProductRecord::new("WII-1", "wii-sports", "Wii Sports", "Nintendo Wii");
        assert!(!u.is_resolved(&bare, AssetSide::Front));
        assert_eq!(u.unrecorded_asset(&bare, AssetSide::Front), Some(written.clone()));
        assert_eq!(u.unrecorded_asset(&dangling, AssetSide::Front), Some(written));
    }

    #[test]
    fn apply_price_converts_minor_units() {
        let dir = tempfile::tempdir().unwrap();
        let u = updater(dir.path());
        let mut catalog = CatalogStore::from_records(
            &dir.path().join("products.json"),
            vec![ProductRecord::new("SW-1", "metroid-dread", "Metroid Dread", "Nintendo Switch")],
        )
        .unwrap();
        let quote = PriceQuote {
            sku: "SW-1".to_string(),
            loose: Some(1168),
            complete: None,
            new: None,
            trade_in: 450,
            source_url: "https://www.pricecharting.com/game/pal-nintendo-switch/metroid-dread".to_string(),
        };
        u.apply_price(&mut catalog, &quote).unwrap();
        let record = catalog.get("SW-1").unwrap();
        assert_eq!(record.trade_in_price, Some(4.5));
        assert_eq!(record.source_loose_price, Some(11.68));
    }
}
