use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::{debug, warn};

use super::{file_title, Candidate, LocatorKind, Strategy, Trust};
use crate::catalog::{AssetSide, ProductRecord};
use crate::config::LookupTables;
use crate::error::ResolveError;
use crate::normalization::text::{normalize_text, significant_tokens, thumbnail_title, token_set};
use crate::providers::archive::MEDIA_TYPES;
use crate::providers::mediawiki::{infobox_image, FILE_NAMESPACE, INFOBOX_IMAGE_FIELDS};
use crate::providers::pricecharting::extract_cover_image;
use crate::providers::{Archive, MediaWiki, PriceCharting, Thumbnails, Wikidata};

const SEARCH_RESULTS_PER_QUERY: usize = 3;
const ENTITY_RESULTS: usize = 3;
const ARCHIVE_ROWS: usize = 5;
const COMMONS_FILE_RESULTS: usize = 10;

/// Operator-curated locators keyed by SKU, then slug.
pub struct ManualOverride {
    tables: Arc<LookupTables>,
}

impl ManualOverride {
    pub fn new(tables: Arc<LookupTables>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl Strategy for ManualOverride {
    fn name(&self) -> &'static str {
        "manual_override"
    }

    fn trust(&self) -> Trust {
        Trust::Override
    }

    fn sides(&self) -> &'static [AssetSide] {
        &[AssetSide::Front, AssetSide::Back]
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        Ok(self
            .tables
            .overrides_for(&product.sku, &product.slug, side)
            .into_iter()
            .map(|entry| Candidate::new(self.name(), entry.locator.clone(), entry.kind, ""))
            .collect())
    }
}

/// Artwork named in the infobox of the product's article.
pub struct Infobox {
    wiki: Arc<MediaWiki>,
    tables: Arc<LookupTables>,
}

impl Infobox {
    pub fn new(wiki: Arc<MediaWiki>, tables: Arc<LookupTables>) -> Self {
        Self { wiki, tables }
    }
}

#[async_trait]
impl Strategy for Infobox {
    fn name(&self) -> &'static str {
        "infobox"
    }

    fn trust(&self) -> Trust {
        Trust::Vetted
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        _side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let article = self.tables.article_title(&product.sku, &product.name);
        let Some(wikitext) = self.wiki.lead_wikitext(&article).await? else {
            debug!(sku = %product.sku, article = %article, "no article");
            return Ok(Vec::new());
        };
        Ok(infobox_image(&wikitext, &INFOBOX_IMAGE_FIELDS)
            .map(|file| {
                Candidate::new(self.name(), file_title(&file), LocatorKind::WikipediaFile, "")
            })
            .into_iter()
            .collect())
    }
}

/// Every image attached to the product's article.
pub struct Gallery {
    wiki: Arc<MediaWiki>,
    tables: Arc<LookupTables>,
}

impl Gallery {
    pub fn new(wiki: Arc<MediaWiki>, tables: Arc<LookupTables>) -> Self {
        Self { wiki, tables }
    }
}

#[async_trait]
impl Strategy for Gallery {
    fn name(&self) -> &'static str {
        "gallery"
    }

    fn trust(&self) -> Trust {
        Trust::Scored
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        _side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let article = self.tables.article_title(&product.sku, &product.name);
        gallery_candidates(&self.wiki, &article, self.name()).await
    }
}

async fn gallery_candidates(
    wiki: &MediaWiki,
    article: &str,
    source: &'static str,
) -> Result<Vec<Candidate>, ResolveError> {
    Ok(wiki
        .page_images(article)
        .await?
        .into_iter()
        .map(|title| Candidate::new(source, title, LocatorKind::WikipediaFile, ""))
        .collect())
}

/// Depicted-image claim of entities whose label names the product.
pub struct LinkedData {
    wikidata: Arc<Wikidata>,
    stop_words: Vec<String>,
}

impl LinkedData {
    pub fn new(wikidata: Arc<Wikidata>, stop_words: Vec<String>) -> Self {
        Self {
            wikidata,
            stop_words,
        }
    }

    fn label_matches(&self, label: &str, name: &str) -> bool {
        let wanted = significant_tokens(name, &self.stop_words);
        if wanted.is_empty() {
            return normalize_text(label) == normalize_text(name);
        }
        let have = token_set(label);
        let matched = wanted.iter().filter(|w| have.contains(*w)).count();
        matched >= if wanted.len() <= 2 { 1 } else { 2 }
    }
}

#[async_trait]
impl Strategy for LinkedData {
    fn name(&self) -> &'static str {
        "linked_data"
    }

    fn trust(&self) -> Trust {
        Trust::Vetted
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        _side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let mut out = Vec::new();
        for entity in self.wikidata.search(&product.name, ENTITY_RESULTS).await? {
            if !self.label_matches(&entity.label, &product.name) {
                debug!(sku = %product.sku, entity = %entity.id, label = %entity.label, "entity label does not name product");
                continue;
            }
            if let Some(file) = self.wikidata.depicted_image(&entity.id).await? {
                out.push(Candidate::url(
                    self.name(),
                    self.wikidata.file_url(&file),
                    entity.label.clone(),
                ));
            }
        }
        Ok(out)
    }
}

/// Full-text search: galleries of the top articles for a few query phrasings, plus file
/// search on the media commons for hardware and archive item thumbnails.
pub struct Search {
    wiki: Arc<MediaWiki>,
    commons: Arc<MediaWiki>,
    archive: Arc<Archive>,
}

impl Search {
    pub fn new(wiki: Arc<MediaWiki>, commons: Arc<MediaWiki>, archive: Arc<Archive>) -> Self {
        Self {
            wiki,
            commons,
            archive,
        }
    }

    pub fn queries(product: &ProductRecord) -> Vec<String> {
        let name = product.name.trim();
        let queries = if product.is_console {
            vec![format!("{name} console"), name.to_string()]
        } else {
            vec![
                format!("{name} video game"),
                format!("{name} {}", product.platform.trim()),
                name.to_string(),
            ]
        };
        queries.into_iter().unique().collect()
    }

    async fn article_candidates(
        &self,
        product: &ProductRecord,
        out: &mut Vec<Candidate>,
    ) -> Result<(), ResolveError> {
        let mut articles = Vec::new();
        for query in Self::queries(product) {
            let hits = self.wiki.search(&query, SEARCH_RESULTS_PER_QUERY, None).await?;
            articles.extend(hits.into_iter().take(SEARCH_RESULTS_PER_QUERY));
        }
        for article in articles.into_iter().unique() {
            out.extend(gallery_candidates(&self.wiki, &article, self.name()).await?);
        }
        Ok(())
    }

    async fn commons_candidates(
        &self,
        product: &ProductRecord,
        out: &mut Vec<Candidate>,
    ) -> Result<(), ResolveError> {
        let query = format!("{} console", product.name.trim());
        let files = self
            .commons
            .search(&query, COMMONS_FILE_RESULTS, Some(FILE_NAMESPACE))
            .await?;
        out.extend(
            files
                .into_iter()
                .map(|title| Candidate::new(self.name(), title, LocatorKind::CommonsFile, "")),
        );
        Ok(())
    }

    async fn archive_candidates(
        &self,
        product: &ProductRecord,
        out: &mut Vec<Candidate>,
    ) -> Result<(), ResolveError> {
        for media_type in MEDIA_TYPES {
            for item in self.archive.search(&product.name, media_type, ARCHIVE_ROWS).await? {
                out.push(Candidate::url(
                    self.name(),
                    self.archive.thumbnail_url(&item.identifier),
                    item.title,
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for Search {
    fn name(&self) -> &'static str {
        "search"
    }

    fn trust(&self) -> Trust {
        Trust::Scored
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        _side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let mut out = Vec::new();
        let mut errors = Vec::new();

        if let Err(e) = self.article_candidates(product, &mut out).await {
            errors.push(e);
        }
        if product.is_console {
            if let Err(e) = self.commons_candidates(product, &mut out).await {
                errors.push(e);
            }
        }
        if let Err(e) = self.archive_candidates(product, &mut out).await {
            errors.push(e);
        }

        match errors.into_iter().next() {
            Some(e) if out.is_empty() => Err(e),
            Some(e) => {
                warn!(sku = %product.sku, error = %e, "search source failed; using partial results");
                Ok(out)
            }
            None => Ok(out),
        }
    }
}

/// Box art from the pricing vendor's product page.
pub struct VendorPage {
    vendor: Arc<PriceCharting>,
    tables: Arc<LookupTables>,
}

impl VendorPage {
    pub fn new(vendor: Arc<PriceCharting>, tables: Arc<LookupTables>) -> Self {
        Self { vendor, tables }
    }
}

#[async_trait]
impl Strategy for VendorPage {
    fn name(&self) -> &'static str {
        "vendor_page"
    }

    fn trust(&self) -> Trust {
        Trust::Vetted
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        _side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        for url in self.vendor.candidate_urls(product, &self.tables.price) {
            let Some(html) = self.vendor.fetch_page(&url).await? else {
                continue;
            };
            if let Some(image) = extract_cover_image(&html) {
                return Ok(vec![Candidate::url(self.name(), image, "")]);
            }
        }
        Ok(Vec::new())
    }
}

/// Named box art in the community thumbnail repository, checked with HEAD first.
pub struct Thumbnail {
    thumbs: Arc<Thumbnails>,
    tables: Arc<LookupTables>,
}

impl Thumbnail {
    pub fn new(thumbs: Arc<Thumbnails>, tables: Arc<LookupTables>) -> Self {
        Self { thumbs, tables }
    }
}

#[async_trait]
impl Strategy for Thumbnail {
    fn name(&self) -> &'static str {
        "thumbnail"
    }

    fn trust(&self) -> Trust {
        Trust::Vetted
    }

    async fn candidates(
        &self,
        product: &ProductRecord,
        _side: AssetSide,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let thumbnails = &self.tables.thumbnails;
        let Some(system) = thumbnails.platforms.get(&product.platform) else {
            return Ok(Vec::new());
        };
        let title = thumbnails
            .titles
            .get(&product.sku)
            .or_else(|| thumbnails.titles.get(&product.name))
            .cloned()
            .unwrap_or_else(|| thumbnail_title(&product.name));
        let url = self.thumbs.url_for(system, &title);
        if !self.thumbs.exists(&url).await? {
            debug!(sku = %product.sku, url = %url, "no thumbnail");
            return Ok(Vec::new());
        }
        Ok(vec![Candidate::url(self.name(), url, title)])
    }
}
