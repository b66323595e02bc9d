//! Pricing vendor pages: `{base}/game/{platform-slug}/{game-slug}` with price history
//! embedded as an inline `VGPC.chart_data = {...};` assignment.

use std::sync::{Arc, OnceLock};

use itertools::Itertools;
use regex::Regex;
use serde_json::Value;

use crate::catalog::ProductRecord;
use crate::config::PriceTables;
use crate::error::ResolveError;
use crate::http::{get_ok, HttpClient, RetryPolicy};
use crate::normalization::text::slugify;

/// Latest non-zero price per condition tier, minor currency units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChartPrices {
    pub loose: Option<i64>,
    pub complete: Option<i64>,
    pub new: Option<i64>,
}

impl ChartPrices {
    pub fn is_empty(&self) -> bool {
        self.loose.is_none() && self.complete.is_none() && self.new.is_none()
    }
}

pub struct PriceCharting {
    http: Arc<dyn HttpClient>,
    base: String,
    retry: RetryPolicy,
}

impl PriceCharting {
    pub fn new(http: Arc<dyn HttpClient>, base: &str, retry: RetryPolicy) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn page_url(&self, platform_slug: &str, game_slug: &str) -> String {
        format!("{}/game/{}/{}", self.base, platform_slug, game_slug)
    }

    /// Pages to try for a product, regional page first. Fallback pages pair the
    /// non-regional platform slug with the SKU's alternate slugs, then the primary slug.
    pub fn candidate_urls(&self, product: &ProductRecord, tables: &PriceTables) -> Vec<String> {
        let game_slug = tables
            .slug_overrides
            .get(&product.sku)
            .cloned()
            .unwrap_or_else(|| slugify(&product.name));

        let primary_platform = tables
            .console_platform_slugs
            .get(&product.sku)
            .or_else(|| tables.platform_slugs.get(&product.platform));
        let fallback_platform = tables
            .console_fallback_platform_slugs
            .get(&product.sku)
            .or_else(|| tables.fallback_platform_slugs.get(&product.platform));

        let mut urls = Vec::new();
        if let Some(platform) = primary_platform {
            urls.push(self.page_url(platform, &game_slug));
        }
        if let Some(platform) = fallback_platform {
            let alternates = tables
                .alternate_slugs
                .get(&product.sku)
                .cloned()
                .unwrap_or_default();
            for slug in alternates.iter().chain(std::iter::once(&game_slug)) {
                urls.push(self.page_url(platform, slug));
            }
        }
        urls.into_iter().unique().collect()
    }

    /// Page body, or `None` when the vendor has no page at that URL.
    pub async fn fetch_page(&self, url: &str) -> Result<Option<String>, ResolveError> {
        match get_ok(self.http.as_ref(), url, self.retry).await {
            Ok(resp) => Ok(Some(resp.text())),
            Err(ResolveError::Network {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn chart_data_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"VGPC\.chart_data\s*=\s*(\{[\s\S]*?\});").expect("static regex")
    })
}

fn cdn_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https://storage\.googleapis\.com/images\.pricecharting\.com/[^"'\s<>]+?\.(?:jpg|jpeg|png)"#)
            .expect("static regex")
    })
}

/// Price points from a product page. `Ok(None)` means the page carries no chart at all.
pub fn extract_chart_prices(html: &str) -> Result<Option<ChartPrices>, ResolveError> {
    let Some(caps) = chart_data_re().captures(html) else {
        return Ok(None);
    };
    let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("{}");
    let data: Value = serde_json::from_str(raw)
        .map_err(|e| ResolveError::parse("VGPC.chart_data", e.to_string()))?;
    Ok(Some(ChartPrices {
        loose: latest_nonzero(&data["used"]),
        complete: latest_nonzero(&data["cib"]),
        new: latest_nonzero(&data["new"]),
    }))
}

/// Series are `[timestamp, price]` pairs in chronological order.
fn latest_nonzero(series: &Value) -> Option<i64> {
    series.as_array()?.iter().rev().find_map(|point| {
        let price = point.as_array()?.get(1)?.as_f64()?.round() as i64;
        (price > 0).then_some(price)
    })
}

/// Box art hosted on the vendor CDN, largest rendition preferred.
pub fn extract_cover_image(html: &str) -> Option<String> {
    let urls: Vec<&str> = cdn_image_re().find_iter(html).map(|m| m.as_str()).collect();
    urls.iter()
        .find(|u| u.contains("/1600."))
        .or_else(|| urls.iter().find(|u| u.contains("/240.")))
        .or_else(|| urls.first())
        .map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{product, FakeHttp, FakeReply};

    const PAGE: &str = r#"<html><script>
        VGPC.chart_data = {"used":[[1690000000000,1200],[1700000000000,1168],[1710000000000,0]],
                           "cib":[[1700000000000,2500]],"new":[],"boxonly":[[1,5]]};
        VGPC.product = {};
        </script>
        <img src="https://storage.googleapis.com/images.pricecharting.com/abc123/240.jpg">
        <a href="https://storage.googleapis.com/images.pricecharting.com/abc123/1600.jpg">zoom</a>
        </html>"#;

    #[test]
    fn latest_nonzero_value_per_tier() {
        let prices = extract_chart_prices(PAGE).unwrap().unwrap();
        assert_eq!(prices.loose, Some(1168));
        assert_eq!(prices.complete, Some(2500));
        assert_eq!(prices.new, None);
    }

    #[test]
    fn page_without_chart_is_none_and_broken_chart_is_parse_error() {
        assert_eq!(extract_chart_prices("<html></html>").unwrap(), None);
        let broken = "VGPC.chart_data = {\"used\": [[1, 2],};";
        assert!(matches!(
            extract_chart_prices(broken),
            Err(ResolveError::Parse { .. })
        ));
    }

    #[test]
    fn cover_image_prefers_large_rendition() {
        assert_eq!(
            extract_cover_image(PAGE).as_deref(),
            Some("https://storage.googleapis.com/images.pricecharting.com/abc123/1600.jpg")
        );
        assert_eq!(extract_cover_image("<html></html>"), None);
    }

    #[test]
    fn candidate_urls_use_overrides_then_fallbacks() {
        let pc = PriceCharting::new(
            Arc::new(FakeHttp::new()),
            "https://www.pricecharting.com",
            RetryPolicy::none(),
        );
        let mut tables = PriceTables::default();
        tables
            .platform_slugs
            .insert("Nintendo Switch".into(), "pal-nintendo-switch".into());
        tables
            .fallback_platform_slugs
            .insert("Nintendo Switch".into(), "nintendo-switch".into());
        tables
            .slug_overrides
            .insert("SW-012".into(), "legend-of-zelda-breath-of-the-wild".into());
        tables
            .alternate_slugs
            .insert("SW-012".into(), vec!["zelda-breath-of-the-wild".into()]);

        let zelda = product("SW-012", "Zelda: Breath of the Wild", "Nintendo Switch");
        assert_eq!(
            pc.candidate_urls(&zelda, &tables),
            vec![
                "https://www.pricecharting.com/game/pal-nintendo-switch/legend-of-zelda-breath-of-the-wild",
                "https://www.pricecharting.com/game/nintendo-switch/zelda-breath-of-the-wild",
                "https://www.pricecharting.com/game/nintendo-switch/legend-of-zelda-breath-of-the-wild",
            ]
        );

        let unknown_platform = product("X-1", "Mystery", "Atari Jaguar");
        assert!(pc.candidate_urls(&unknown_platform, &tables).is_empty());
    }

    #[tokio::test]
    async fn missing_page_is_none() {
        let http = Arc::new(FakeHttp::new().reply("/game/", FakeReply::status(404)));
        let pc = PriceCharting::new(http, "https://www.pricecharting.com", RetryPolicy::none());
        let page = pc
            .fetch_page("https://www.pricecharting.com/game/pal-wii/nope")
            .await
            .unwrap();
        assert_eq!(page, None);
    }
}
