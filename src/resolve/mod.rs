//! Candidate resolution: an ordered chain of strategies, each asking one upstream for
//! references to a product's artwork, ranked by the scorer.

pub mod scorer;
pub mod strategies;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{AssetSide, ProductRecord};
use crate::config::{LookupTables, PipelineSettings};
use crate::error::ResolveError;
use crate::http::{HttpClient, RetryPolicy};
use crate::providers::{Archive, MediaWiki, PriceCharting, Thumbnails, Wikidata};

use self::scorer::Scorer;
use self::strategies::{
    Gallery, Infobox, LinkedData, ManualOverride, Search, Thumbnail, VendorPage,
};

/// How a candidate's locator turns into a downloadable URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    /// Already a direct URL.
    #[default]
    Url,
    /// `File:` title resolved through the encyclopedia API.
    WikipediaFile,
    /// `File:` title resolved through the media commons API.
    CommonsFile,
}

/// How much of the scorer a strategy's candidates go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Operator-supplied; no gates.
    Override,
    /// Source already ties the image to the product; exclusion and raster gates only.
    Vetted,
    /// Full ranking against the product name and platform.
    Scored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source: &'static str,
    pub locator: String,
    pub kind: LocatorKind,
    /// Human-readable text the candidate was found under (file title, entity label, ...).
    pub title: String,
    pub score: i32,
    pub rejection: Option<String>,
}

impl Candidate {
    pub fn new(source: &'static str, locator: impl Into<String>, kind: LocatorKind, title: impl Into<String>) -> Self {
        Self {
            source,
            locator: locator.into(),
            kind,
            title: title.into(),
            score: 0,
            rejection: None,
        }
    }

    pub fn url(source: &'static str, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(source, url, LocatorKind::Url, title)
    }

    /// Decoded last path segment of the locator, without query or fragment.
    pub fn file_name(&self) -> String {
        let path = self.locator.split(['?', '#']).next().unwrap_or(&self.locator);
        let last = path.rsplit('/').next().unwrap_or(path);
        urlencoding::decode(last)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last.to_string())
    }

    /// Title plus the decoded file name of the locator. Hosts and directories are left out
    /// so words like `wiki` in a CDN hostname cannot trip the exclusion list.
    pub fn scoring_text(&self) -> String {
        let file = self.file_name();
        if self.title.is_empty() || self.title == file {
            file
        } else {
            format!("{} {}", self.title, file)
        }
    }

    pub fn accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn trust(&self) -> Trust;

    fn sides(&self) -> &'static [AssetSide] {
        &[AssetSide::Front]
    }

    /// Raw candidates, unranked. Must not touch the catalog or the filesystem.
    async fn candidates(
        &self,
        product: &ProductRecord,
        side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError>;
}

#[derive(Debug, Default)]
pub struct Ranking {
    /// Best first, capped per strategy.
    pub accepted: Vec<Candidate>,
    pub rejected: Vec<Candidate>,
}

pub struct ResolverChain {
    strategies: Vec<Box<dyn Strategy>>,
    scorer: Scorer,
    tables: Arc<LookupTables>,
    wiki: Arc<MediaWiki>,
    commons: Arc<MediaWiki>,
    max_candidates: usize,
}

impl ResolverChain {
    pub fn new(
        strategies: Vec<Box<dyn Strategy>>,
        tables: Arc<LookupTables>,
        wiki: Arc<MediaWiki>,
        commons: Arc<MediaWiki>,
        max_candidates: usize,
    ) -> Self {
        Self {
            scorer: Scorer::new(tables.scoring.clone()),
            strategies,
            tables,
            wiki,
            commons,
            max_candidates: max_candidates.max(1),
        }
    }

    /// Every strategy in priority order, wired to the configured endpoints.
    pub fn standard(
        http: Arc<dyn HttpClient>,
        settings: &PipelineSettings,
        tables: Arc<LookupTables>,
    ) -> Self {
        let retry = RetryPolicy::from_settings(&settings.http);
        let ep = &settings.endpoints;
        let wiki = Arc::new(MediaWiki::new(http.clone(), &ep.wikipedia_api, retry));
        let commons = Arc::new(MediaWiki::new(http.clone(), &ep.commons_api, retry));
        let wikidata = Arc::new(Wikidata::new(
            http.clone(),
            &ep.wikidata_api,
            &ep.commons_file_path,
            retry,
        ));
        let archive = Arc::new(Archive::new(
            http.clone(),
            &ep.archive_search,
            &ep.archive_download,
            retry,
        ));
        let vendor = Arc::new(PriceCharting::new(http.clone(), &ep.pricecharting, retry));
        let thumbs = Arc::new(Thumbnails::new(http, &ep.thumbnails));

        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(ManualOverride::new(tables.clone())),
            Box::new(Infobox::new(wiki.clone(), tables.clone())),
            Box::new(Gallery::new(wiki.clone(), tables.clone())),
            Box::new(LinkedData::new(wikidata, tables.scoring.stop_words.clone())),
            Box::new(Search::new(wiki.clone(), commons.clone(), archive)),
            Box::new(VendorPage::new(vendor, tables.clone())),
            Box::new(Thumbnail::new(thumbs, tables.clone())),
        ];
        Self::new(
            strategies,
            tables,
            wiki,
            commons,
            settings.max_candidates_per_strategy,
        )
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Strategies applicable to one side, in priority order.
    pub fn strategies_for(&self, side: AssetSide) -> impl Iterator<Item = &dyn Strategy> {
        self.strategies
            .iter()
            .map(|s| s.as_ref())
            .filter(move |s| s.sides().contains(&side))
    }

    /// Candidates of one strategy, scored according to its trust level and deduplicated by
    /// locator.
    pub async fn ranked(
        &self,
        strategy: &dyn Strategy,
        product: &ProductRecord,
        side: AssetSide,
    ) -> Result<Ranking, ResolveError> {
        let raw = strategy.candidates(product, side).await?;
        let hint = self.tables.title_hint(&product.sku);
        let threshold = self.scorer.rules().accept_threshold;

        let mut seen = HashSet::new();
        let mut ranking = Ranking::default();
        for mut candidate in raw {
            if !seen.insert(candidate.locator.clone()) {
                continue;
            }
            let verdict = match strategy.trust() {
                Trust::Override => None,
                Trust::Vetted => Some(self.scorer.vet(&candidate.file_name(), &product.name)),
                Trust::Scored => Some(self.scorer.evaluate(
                    &candidate.scoring_text(),
                    &product.name,
                    &product.platform,
                    hint,
                )),
            };
            match verdict {
                Some(v) => {
                    candidate.score = v.score;
                    candidate.rejection = v.rejection;
                }
                None => candidate.score = threshold,
            }
            debug!(
                sku = %product.sku,
                strategy = strategy.name(),
                locator = %candidate.locator,
                score = candidate.score,
                rejection = candidate.rejection.as_deref().unwrap_or(""),
                "candidate"
            );
            if candidate.accepted() {
                ranking.accepted.push(candidate);
            } else {
                ranking.rejected.push(candidate);
            }
        }
        ranking.accepted.sort_by(|a, b| b.score.cmp(&a.score));
        ranking.accepted.truncate(self.max_candidates);
        Ok(ranking)
    }

    /// Accepted candidates of the first strategy that produced any. Strategy errors are
    /// logged and the chain moves on.
    pub async fn resolve(
        &self,
        product: &ProductRecord,
        side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let mut rejected = 0usize;
        for strategy in self.strategies_for(side) {
            match self.ranked(strategy, product, side).await {
                Ok(ranking) if !ranking.accepted.is_empty() => {
                    info!(
                        sku = %product.sku,
                        strategy = strategy.name(),
                        accepted = ranking.accepted.len(),
                        "candidates found"
                    );
                    return Ok(ranking.accepted);
                }
                Ok(ranking) => rejected += ranking.rejected.len(),
                Err(e) => {
                    warn!(sku = %product.sku, strategy = strategy.name(), error = %e, "strategy failed")
                }
            }
        }
        Err(ResolveError::not_found(format!(
            "no accepted {side} candidate ({rejected} rejected)"
        )))
    }

    /// Downloadable URL for a candidate.
    pub async fn locate(&self, candidate: &Candidate) -> Result<String, ResolveError> {
        let api = match candidate.kind {
            LocatorKind::Url => return Ok(candidate.locator.clone()),
            LocatorKind::WikipediaFile => &self.wiki,
            LocatorKind::CommonsFile => &self.commons,
        };
        let title = file_title(&candidate.locator);
        api.image_info(&title)
            .await?
            .map(|info| info.url)
            .ok_or_else(|| ResolveError::not_found(format!("{title} has no image info")))
    }
}

/// `File:`-prefixed title, whatever form the locator came in.
pub fn file_title(locator: &str) -> String {
    let trimmed = locator.trim();
    for prefix in ["File:", "Image:", "file:", "image:"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return format!("File:{}", rest.trim());
        }
    }
    format!("File:{trimmed}")
}
