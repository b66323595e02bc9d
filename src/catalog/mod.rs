//! Product catalog: a JSON array of records read in full and rewritten atomically.

pub mod updater;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::util::fs::{ensure_writable, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSide {
    #[default]
    Front,
    Back,
}

impl AssetSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
        }
    }

    /// Appended to the slug to form the asset file stem.
    pub fn stem_suffix(&self) -> &'static str {
        match self {
            Self::Front => "",
            Self::Back => "-back",
        }
    }
}

impl fmt::Display for AssetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            other => Err(format!("unknown asset side '{other}' (expected front|back)")),
        }
    }
}

/// One catalog entry. Fields this pipeline does not own are kept in `extra` and written
/// back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub sku: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub is_console: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image: Option<String>,
    /// Trade-in price offered to sellers, major currency units.
    #[serde(
        default,
        rename = "inkoopPrijs",
        skip_serializing_if = "Option::is_none"
    )]
    pub trade_in_price: Option<f64>,
    /// Loose price reported by the pricing vendor, major currency units.
    #[serde(
        default,
        rename = "pcUsedPrice",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_loose_price: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProductRecord {
    pub fn new(sku: &str, slug: &str, name: &str, platform: &str) -> Self {
        Self {
            sku: sku.to_string(),
            slug: slug.to_string(),
            name: name.to_string(),
            platform: platform.to_string(),
            is_console: false,
            image: None,
            back_image: None,
            trade_in_price: None,
            source_loose_price: None,
            extra: Map::new(),
        }
    }

    pub fn asset(&self, side: AssetSide) -> Option<&str> {
        match side {
            AssetSide::Front => self.image.as_deref(),
            AssetSide::Back => self.back_image.as_deref(),
        }
    }

    fn set_asset(&mut self, side: AssetSide, path: String) {
        match side {
            AssetSide::Front => self.image = Some(path),
            AssetSide::Back => self.back_image = Some(path),
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.extra.get("category").and_then(Value::as_str)
    }
}

#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    products: Vec<ProductRecord>,
    by_sku: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
    dirty: bool,
}

impl CatalogStore {
    /// Read and index the catalog. Unreadable files and duplicate SKUs or slugs are fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let products: Vec<ProductRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        let store = Self::from_records(path, products)?;
        info!(path = %path.display(), products = store.len(), "catalog loaded");
        Ok(store)
    }

    pub fn from_records(path: &Path, products: Vec<ProductRecord>) -> Result<Self> {
        let mut by_sku = HashMap::with_capacity(products.len());
        let mut by_slug = HashMap::with_capacity(products.len());
        for (idx, p) in products.iter().enumerate() {
            if by_sku.insert(p.sku.clone(), idx).is_some() {
                bail!("duplicate sku {} in catalog {}", p.sku, path.display());
            }
            if by_slug.insert(p.slug.clone(), idx).is_some() {
                bail!("duplicate slug {} in catalog {}", p.slug, path.display());
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            products,
            by_sku,
            by_slug,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn products(&self) -> &[ProductRecord] {
        &self.products
    }

    pub fn get(&self, sku: &str) -> Option<&ProductRecord> {
        self.by_sku.get(sku).map(|&i| &self.products[i])
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<&ProductRecord> {
        self.by_slug.get(slug).map(|&i| &self.products[i])
    }

    pub fn get_mut(&mut self, sku: &str) -> Option<&mut ProductRecord> {
        let idx = *self.by_sku.get(sku)?;
        self.dirty = true;
        Some(&mut self.products[idx])
    }

    pub fn set_asset(&mut self, sku: &str, side: AssetSide, path: &str) -> Result<(), ResolveError> {
        let record = self
            .get_mut(sku)
            .ok_or_else(|| ResolveError::catalog(sku, "no catalog record for sku"))?;
        record.set_asset(side, path.to_string());
        Ok(())
    }

    /// Checked before any network activity: a catalog that cannot be rewritten makes every
    /// downstream write meaningless.
    pub fn ensure_writable(&self) -> Result<()> {
        ensure_writable(&self.path)
            .with_context(|| format!("catalog {} is not writable", self.path.display()))
    }

    /// Write the whole document to a temp file and rename it over the catalog.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            debug!(path = %self.path.display(), "catalog unchanged; skipping write");
            return Ok(());
        }
        let mut body = serde_json::to_vec_pretty(&self.products).context("serializing catalog")?;
        body.push(b'\n');
        write_atomic(&self.path, &body)
            .with_context(|| format!("writing catalog {}", self.path.display()))?;
        self.dirty = false;
        info!(path = %self.path.display(), products = self.products.len(), "catalog persisted");
        Ok(())
    }
}
