//! Runtime settings (defaults, then `ENRICH_*` environment) and the JSON lookup tables
//! that steer the resolution strategies.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::AssetSide;
use crate::normalize::{FitPolicy, NormalizerConfig, OutputFormat};
use crate::pipeline::selection::TierRules;
use crate::resolve::scorer::ScoringRules;
use crate::resolve::LocatorKind;
use crate::util::env::{env_opt, env_pairs, env_parse};

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Operator-curated data. Everything here can change without a rebuild.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupTables {
    /// SKU or product name -> encyclopedia article title.
    pub article_titles: IndexMap<String, String>,
    /// SKU or slug -> exact locators, tried before any search.
    pub manual_overrides: IndexMap<String, Vec<OverrideEntry>>,
    /// SKU -> disambiguation terms for products sharing one article.
    pub title_hints: IndexMap<String, TitleHint>,
    pub price: PriceTables,
    pub thumbnails: ThumbnailTables,
    pub alternate_spellings: Vec<SpellingRule>,
    pub scoring: ScoringRules,
    pub tiers: TierRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub locator: String,
    #[serde(default)]
    pub kind: LocatorKind,
    #[serde(default)]
    pub side: AssetSide,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleHint {
    pub pick: Vec<String>,
    pub avoid: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceTables {
    /// Catalog platform -> regional (PAL) vendor platform slug.
    pub platform_slugs: IndexMap<String, String>,
    /// Catalog platform -> vendor platform slug used when the regional page has no data.
    pub fallback_platform_slugs: IndexMap<String, String>,
    /// SKU -> platform slug for hardware, whose catalog platform is often generic.
    pub console_platform_slugs: IndexMap<String, String>,
    pub console_fallback_platform_slugs: IndexMap<String, String>,
    /// SKU -> game slug for names the vendor spells differently.
    pub slug_overrides: IndexMap<String, String>,
    /// SKU -> extra game slugs tried on fallback platform pages.
    pub alternate_slugs: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailTables {
    /// Catalog platform -> thumbnail repository system name.
    pub platforms: IndexMap<String, String>,
    /// SKU or product name -> exact thumbnail title.
    pub titles: IndexMap<String, String>,
}

/// Substring rewrite that maps a slug onto its alternate spelling, e.g. `pokmon` -> `pok-mon`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellingRule {
    pub from: String,
    pub to: String,
}

impl LookupTables {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading lookup tables {}", path.display()))?;
        let tables: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing lookup tables {}", path.display()))?;
        info!(
            path = %path.display(),
            overrides = tables.manual_overrides.len(),
            articles = tables.article_titles.len(),
            exclusions = tables.scoring.exclusions.len(),
            "lookup tables loaded"
        );
        Ok(tables)
    }

    /// Missing file falls back to built-in defaults; a present but malformed file is fatal.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "lookup tables not found; using built-in defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Override entries for one side, looked up by SKU first and then slug.
    pub fn overrides_for(&self, sku: &str, slug: &str, side: AssetSide) -> Vec<&OverrideEntry> {
        [sku, slug]
            .iter()
            .filter_map(|key| self.manual_overrides.get(*key))
            .flatten()
            .filter(|entry| entry.side == side)
            .collect()
    }

    /// Article title by SKU, then by product name, then the raw name itself.
    pub fn article_title(&self, sku: &str, name: &str) -> String {
        self.article_titles
            .get(sku)
            .or_else(|| self.article_titles.get(name))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn title_hint(&self, sku: &str) -> Option<&TitleHint> {
        self.title_hints.get(sku)
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub retries: u32,
    pub backoff_base: Duration,
    /// Bodies smaller than this are treated as error pages or tracking pixels.
    pub min_bytes: usize,
    pub default_interval: Duration,
    pub host_intervals: Vec<(String, Duration)>,
    pub per_host_concurrency: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: BROWSER_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
            max_redirects: 5,
            retries: 2,
            backoff_base: Duration::from_millis(500),
            min_bytes: 1000,
            default_interval: Duration::from_millis(300),
            host_intervals: vec![("www.pricecharting.com".to_string(), Duration::from_millis(500))],
            per_host_concurrency: 2,
        }
    }
}

/// Base URLs of every upstream, overridable for mirrors and local fakes.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub wikipedia_api: String,
    pub commons_api: String,
    pub wikidata_api: String,
    pub commons_file_path: String,
    pub archive_search: String,
    pub archive_download: String,
    pub pricecharting: String,
    pub thumbnails: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            wikipedia_api: "https://en.wikipedia.org/w/api.php".to_string(),
            commons_api: "https://commons.wikimedia.org/w/api.php".to_string(),
            wikidata_api: "https://www.wikidata.org/w/api.php".to_string(),
            commons_file_path: "https://commons.wikimedia.org/wiki/Special:FilePath".to_string(),
            archive_search: "https://archive.org/advancedsearch.php".to_string(),
            archive_download: "https://archive.org/download".to_string(),
            pricecharting: "https://www.pricecharting.com".to_string(),
            thumbnails: "https://thumbnails.libretro.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingSettings {
    /// Trade-in share of the base price in basis points (4000 = 40%).
    pub rate_bps: i64,
    /// Trade-in prices are rounded to a multiple of this many minor units.
    pub rounding_unit: i64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            rate_bps: 4000,
            rounding_unit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub catalog_path: PathBuf,
    pub tables_path: PathBuf,
    pub asset_dir: PathBuf,
    pub public_prefix: String,
    pub report_dir: PathBuf,
    pub concurrency: usize,
    pub product_budget: Duration,
    pub checkpoint_every: usize,
    pub max_candidates_per_strategy: usize,
    pub http: HttpSettings,
    pub normalizer: NormalizerConfig,
    pub endpoints: Endpoints,
    pub pricing: PricingSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("src/data/products.json"),
            tables_path: PathBuf::from("config/lookup_tables.json"),
            asset_dir: PathBuf::from("public/images/products"),
            public_prefix: "/images/products".to_string(),
            report_dir: PathBuf::from("."),
            concurrency: 4,
            product_budget: Duration::from_secs(60),
            checkpoint_every: 25,
            max_candidates_per_strategy: 5,
            http: HttpSettings::default(),
            normalizer: NormalizerConfig::default(),
            endpoints: Endpoints::default(),
            pricing: PricingSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        let d = Self::default();

        let mut http = d.http.clone();
        http.user_agent = env_opt("ENRICH_USER_AGENT").unwrap_or(http.user_agent);
        http.timeout = Duration::from_secs(env_parse("ENRICH_HTTP_TIMEOUT_SECS", 20u64));
        http.max_redirects = env_parse("ENRICH_MAX_REDIRECTS", http.max_redirects);
        http.retries = env_parse("ENRICH_RETRIES", http.retries);
        http.backoff_base = Duration::from_millis(env_parse("ENRICH_BACKOFF_MS", 500u64));
        http.min_bytes = env_parse("ENRICH_MIN_BYTES", http.min_bytes);
        http.default_interval =
            Duration::from_millis(env_parse("ENRICH_HOST_INTERVAL_MS", 300u64));
        let overrides: Vec<(String, u64)> = env_pairs("ENRICH_HOST_INTERVALS");
        for (host, ms) in overrides {
            http.host_intervals.retain(|(h, _)| h != &host);
            http.host_intervals.push((host, Duration::from_millis(ms)));
        }
        http.per_host_concurrency =
            env_parse("ENRICH_PER_HOST_CONCURRENCY", http.per_host_concurrency).max(1);

        let mut normalizer = d.normalizer.clone();
        normalizer.size = env_parse("ENRICH_OUTPUT_SIZE", normalizer.size);
        normalizer.quality = env_parse("ENRICH_OUTPUT_QUALITY", normalizer.quality);
        normalizer.max_aspect_ratio = env_parse("ENRICH_MAX_ASPECT", normalizer.max_aspect_ratio);
        normalizer.fit = env_parse::<FitPolicy>("ENRICH_FIT", normalizer.fit);
        normalizer.format = env_parse::<OutputFormat>("ENRICH_OUTPUT_FORMAT", normalizer.format);

        let de = d.endpoints.clone();
        let endpoints = Endpoints {
            wikipedia_api: env_opt("ENRICH_WIKIPEDIA_URL").unwrap_or(de.wikipedia_api),
            commons_api: env_opt("ENRICH_COMMONS_URL").unwrap_or(de.commons_api),
            wikidata_api: env_opt("ENRICH_WIKIDATA_URL").unwrap_or(de.wikidata_api),
            commons_file_path: env_opt("ENRICH_COMMONS_FILE_URL").unwrap_or(de.commons_file_path),
            archive_search: env_opt("ENRICH_ARCHIVE_SEARCH_URL").unwrap_or(de.archive_search),
            archive_download: env_opt("ENRICH_ARCHIVE_DOWNLOAD_URL")
                .unwrap_or(de.archive_download),
            pricecharting: env_opt("ENRICH_PRICECHARTING_URL").unwrap_or(de.pricecharting),
            thumbnails: env_opt("ENRICH_THUMBNAILS_URL").unwrap_or(de.thumbnails),
        };

        Self {
            catalog_path: env_opt("ENRICH_CATALOG")
                .map(PathBuf::from)
                .unwrap_or(d.catalog_path),
            tables_path: env_opt("ENRICH_TABLES")
                .map(PathBuf::from)
                .unwrap_or(d.tables_path),
            asset_dir: env_opt("ENRICH_ASSET_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.asset_dir),
            public_prefix: env_opt("ENRICH_PUBLIC_PREFIX").unwrap_or(d.public_prefix),
            report_dir: env_opt("ENRICH_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.report_dir),
            concurrency: env_parse("ENRICH_CONCURRENCY", d.concurrency).max(1),
            product_budget: Duration::from_secs(env_parse("ENRICH_PRODUCT_BUDGET_SECS", 60u64)),
            checkpoint_every: env_parse("ENRICH_CHECKPOINT_EVERY", d.checkpoint_every),
            max_candidates_per_strategy: env_parse(
                "ENRICH_MAX_CANDIDATES",
                d.max_candidates_per_strategy,
            )
            .max(1),
            http,
            normalizer,
            endpoints,
            pricing: PricingSettings {
                rate_bps: env_parse("ENRICH_TRADE_IN_BPS", d.pricing.rate_bps),
                rounding_unit: env_parse("ENRICH_ROUNDING_UNIT", d.pricing.rounding_unit).max(1),
            },
        }
    }

    pub fn interval_for(&self, host: &str) -> Duration {
        self.http
            .host_intervals
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, d)| *d)
            .unwrap_or(self.http.default_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLES: &str = r#"{
        "article_titles": { "SW-100": "Pokémon Sword and Shield", "Metroid Dread": "Metroid Dread" },
        "manual_overrides": {
            "SW-100": [
                { "locator": "File:Pokemon_Sword_cover.png", "kind": "wikipedia_file" },
                { "locator": "https://example.test/back.jpg", "side": "back" }
            ],
            "pokemon-shield": [{ "locator": "File:Shield.png", "kind": "commons_file" }]
        },
        "title_hints": { "SW-100": { "pick": ["sword"], "avoid": ["shield"] } },
        "alternate_spellings": [{ "from": "pokmon", "to": "pok-mon" }]
    }"#;

    #[test]
    fn partial_tables_fill_defaults() {
        let tables: LookupTables = serde_json::from_str(TABLES).unwrap();
        assert_eq!(tables.alternate_spellings.len(), 1);
        assert!(tables.price.platform_slugs.is_empty());
        assert!(!tables.scoring.exclusions.is_empty());
    }

    #[test]
    fn overrides_are_split_by_side_and_keyed_by_sku_then_slug() {
        let tables: LookupTables = serde_json::from_str(TABLES).unwrap();
        let front = tables.overrides_for("SW-100", "pokemon-sword", AssetSide::Front);
        assert_eq!(front.len(), 1);
        assert_eq!(front[0].kind, LocatorKind::WikipediaFile);

        let back = tables.overrides_for("SW-100", "pokemon-sword", AssetSide::Back);
        assert_eq!(back[0].kind, LocatorKind::Url);

        let by_slug = tables.overrides_for("SW-101", "pokemon-shield", AssetSide::Front);
        assert_eq!(by_slug[0].locator, "File:Shield.png");
    }

    #[test]
    fn article_title_falls_back_to_name() {
        let tables: LookupTables = serde_json::from_str(TABLES).unwrap();
        assert_eq!(tables.article_title("SW-100", "Pokémon Sword"), "Pokémon Sword and Shield");
        assert_eq!(tables.article_title("SW-200", "Metroid Dread"), "Metroid Dread");
        assert_eq!(tables.article_title("SW-300", "Splatoon 3"), "Splatoon 3");
    }

    #[test]
    fn missing_table_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let tables = LookupTables::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert!(tables.manual_overrides.is_empty());
    }

    #[test]
    fn malformed_table_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(LookupTables::load_or_default(&path).is_err());
    }

    #[test]
    fn shipped_tables_parse() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/lookup_tables.json");
        let tables = LookupTables::load(&path).unwrap();
        assert_eq!(
            tables.price.platform_slugs.get("Wii").map(String::as_str),
            Some("pal-wii")
        );
        assert_eq!(tables.tiers, TierRules::default());
        assert_eq!(tables.title_hint("SW-003").unwrap().avoid, vec!["shield".to_string()]);
    }

    #[test]
    fn host_interval_overrides_default() {
        let settings = PipelineSettings::default();
        assert_eq!(
            settings.interval_for("www.pricecharting.com"),
            Duration::from_millis(500)
        );
        assert_eq!(settings.interval_for("en.wikipedia.org"), Duration::from_millis(300));
    }
}
