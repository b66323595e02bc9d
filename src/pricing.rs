//! Trade-in quotes from the pricing vendor's chart data.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::ProductRecord;
use crate::config::{LookupTables, PricingSettings};
use crate::error::ResolveError;
use crate::providers::pricecharting::{extract_chart_prices, PriceCharting};
use crate::util::fs::write_atomic;

/// Prices in minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub sku: String,
    #[serde(rename = "pcUsed")]
    pub loose: Option<i64>,
    #[serde(rename = "pcCib")]
    pub complete: Option<i64>,
    #[serde(rename = "pcNew")]
    pub new: Option<i64>,
    #[serde(rename = "inkoopPrijs")]
    pub trade_in: i64,
    #[serde(rename = "sourceUrl")]
    pub source_url: String,
}

/// Round half up to the nearest multiple of `unit`.
pub fn round_to_increment(value: i64, unit: i64) -> i64 {
    if unit <= 1 {
        return value;
    }
    let half = unit / 2;
    if value >= 0 {
        (value + half) / unit * unit
    } else {
        -((-value + half) / unit * unit)
    }
}

/// `base × rate`, rounded to whole minor units, then to the rounding unit.
pub fn trade_in(base: i64, rate_bps: i64, unit: i64) -> i64 {
    let raw = (base * rate_bps + 5_000) / 10_000;
    round_to_increment(raw, unit)
}

pub struct PriceResolver {
    vendor: Arc<PriceCharting>,
    tables: Arc<LookupTables>,
    settings: PricingSettings,
}

impl PriceResolver {
    pub fn new(
        vendor: Arc<PriceCharting>,
        tables: Arc<LookupTables>,
        settings: PricingSettings,
    ) -> Self {
        Self {
            vendor,
            tables,
            settings,
        }
    }

    /// Regional page first, then the non-regional fallbacks. Pages that are missing or carry
    /// no loose/complete price are skipped.
    pub async fn quote(&self, product: &ProductRecord) -> Result<PriceQuote, ResolveError> {
        let urls = self.vendor.candidate_urls(product, &self.tables.price);
        if urls.is_empty() {
            return Err(ResolveError::not_found(format!(
                "no vendor platform slug for '{}'",
                product.platform
            )));
        }

        let mut last_error = None;
        for url in &urls {
            let html = match self.vendor.fetch_page(url).await {
                Ok(Some(html)) => html,
                Ok(None) => {
                    debug!(sku = %product.sku, url = %url, "no vendor page");
                    continue;
                }
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            let prices = match extract_chart_prices(&html) {
                Ok(Some(prices)) => prices,
                Ok(None) => continue,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            let Some(base) = prices.loose.or(prices.complete) else {
                debug!(sku = %product.sku, url = %url, "chart has no loose or complete price");
                continue;
            };
            let trade_in = trade_in(base, self.settings.rate_bps, self.settings.rounding_unit);
            if trade_in <= 0 {
                return Err(ResolveError::validation(format!(
                    "trade-in for base price {base} rounds to zero"
                )));
            }
            info!(
                sku = %product.sku,
                loose = prices.loose.unwrap_or_default(),
                complete = prices.complete.unwrap_or_default(),
                trade_in,
                "price quoted"
            );
            return Ok(PriceQuote {
                sku: product.sku.clone(),
                loose: prices.loose,
                complete: prices.complete,
                new: prices.new,
                trade_in,
                source_url: url.clone(),
            });
        }

        Err(last_error.unwrap_or_else(|| {
            ResolveError::not_found(format!("no price data on {} vendor page(s)", urls.len()))
        }))
    }
}

/// Per-run record of every quote, next to the failures file.
pub fn write_price_report(path: &Path, quotes: &[PriceQuote]) -> Result<()> {
    let json = serde_json::to_vec_pretty(quotes).context("serializing price report")?;
    write_atomic(path, &json).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), quotes = quotes.len(), "price report written");
    Ok(())
}
