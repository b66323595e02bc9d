use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::{Outcome, PipelineContext, ProductError, ProductProgress, ProductState, ProductWorker, RunSummary};
use crate::catalog::{AssetSide, ProductRecord};
use crate::error::ResolveError;
use crate::fetch::Fetcher;
use crate::http::RetryPolicy;
use crate::ledger::FailureRecord;
use crate::normalize::Normalizer;
use crate::pricing::{PriceQuote, PriceResolver};
use crate::providers::PriceCharting;
use crate::resolve::{Candidate, ResolverChain};

/// Ctrl+C stops new products from starting; in-flight ones finish and the run flushes.
pub fn install_cancel_handler(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; finishing in-flight products");
                flag.store(true, Ordering::SeqCst);
            }
            Err(err) => warn!(error = %err, "failed to install Ctrl+C handler"),
        }
    });
}

/// Bounded worker pool: one task per product, gated by a semaphore.
pub struct BatchDriver {
    ctx: Arc<PipelineContext>,
}

impl BatchDriver {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub async fn run(
        &self,
        worker: Arc<dyn ProductWorker>,
        products: Vec<ProductRecord>,
    ) -> Result<RunSummary> {
        let ctx = &self.ctx;
        let semaphore = Arc::new(Semaphore::new(ctx.settings.concurrency.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut summary = RunSummary::default();
        let mut skus = Vec::new();
        let mut tasks = Vec::new();

        info!(
            worker = worker.name(),
            products = products.len(),
            concurrency = ctx.settings.concurrency,
            dry_run = ctx.dry_run,
            "batch starting"
        );

        for product in products {
            if worker.is_done(ctx, &product) {
                debug!(sku = %product.sku, worker = worker.name(), "already done; skipping");
                summary.record(&product.sku, Outcome::Skipped);
                continue;
            }
            let ctx = ctx.clone();
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            skus.push(product.sku.clone());
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Outcome::Cancelled;
                };
                if ctx.is_cancelled() {
                    return Outcome::Cancelled;
                }
                let outcome = run_one(&ctx, worker.as_ref(), &product).await;
                if outcome == Outcome::Succeeded && !ctx.dry_run {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let every = ctx.settings.checkpoint_every;
                    if every > 0 && done % every == 0 {
                        checkpoint(&ctx, done).await;
                    }
                }
                outcome
            }));
        }

        let results = join_all(tasks).await;
        for (sku, result) in skus.iter().zip(results) {
            match result {
                Ok(outcome) => summary.record(sku, outcome),
                Err(join_err) => {
                    error!(sku = %sku, error = %join_err, "worker task panicked");
                    ctx.ledger.record(FailureRecord::orphan(sku, None));
                    summary.record(sku, Outcome::Failed);
                }
            }
        }

        if !ctx.dry_run {
            ctx.catalog.lock().await.persist()?;
        }
        info!(
            worker = worker.name(),
            total = summary.total,
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        Ok(summary)
    }
}

async fn run_one(ctx: &PipelineContext, worker: &dyn ProductWorker, product: &ProductRecord) -> Outcome {
    let mut progress = ProductProgress::default();
    let budget = ctx.settings.product_budget;
    let result = match tokio::time::timeout(budget, worker.process(ctx, product, &mut progress)).await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::Timeout { budget }.into()),
    };
    match result {
        Ok(()) => {
            debug!(sku = %product.sku, state = ?progress.state(), "product done");
            Outcome::Succeeded
        }
        Err(ProductError { error, locator }) => {
            progress.fail();
            ctx.ledger
                .record(FailureRecord::new(product, locator, &error));
            Outcome::Failed
        }
    }
}

async fn checkpoint(ctx: &PipelineContext, done: usize) {
    match ctx.catalog.lock().await.persist() {
        Ok(()) => debug!(done, "checkpoint"),
        Err(e) => warn!(done, error = %e, "checkpoint persist failed; will retry at end of run"),
    }
}

/// Resolves, fetches and normalizes one side's artwork, then records it in the catalog.
pub struct CoverWorker {
    chain: ResolverChain,
    fetcher: Fetcher,
    normalizer: Normalizer,
    side: AssetSide,
}

impl CoverWorker {
    pub fn new(chain: ResolverChain, fetcher: Fetcher, normalizer: Normalizer, side: AssetSide) -> Self {
        Self {
            chain,
            fetcher,
            normalizer,
            side,
        }
    }

    pub fn from_context(ctx: &PipelineContext, side: AssetSide) -> Self {
        let settings = &ctx.settings;
        Self::new(
            ResolverChain::standard(ctx.http.clone(), settings, ctx.tables.clone()),
            Fetcher::from_settings(ctx.http.clone(), &settings.http),
            Normalizer::new(settings.normalizer.clone()),
            side,
        )
    }

    async fn try_candidate(
        &self,
        ctx: &PipelineContext,
        product: &ProductRecord,
        candidate: &Candidate,
        progress: &mut ProductProgress,
    ) -> Result<Vec<String>, ProductError> {
        progress.advance(ProductState::Fetching);
        let url = self
            .chain
            .locate(candidate)
            .await
            .map_err(|e| ProductError::at(e, &candidate.locator))?;
        let download = ctx.updater.download_path(&product.slug, self.side);
        self.fetcher
            .fetch(&url, &download)
            .await
            .map_err(|e| ProductError::at(e, &url))?;

        progress.advance(ProductState::Normalizing);
        let normalized = std::fs::read(&download)
            .map_err(|e| ResolveError::validation(format!("reading {}: {e}", download.display())))
            .and_then(|raw| self.normalizer.normalize(&raw));
        if let Err(e) = std::fs::remove_file(&download) {
            warn!(path = %download.display(), error = %e, "failed to remove download");
        }
        let asset = normalized.map_err(|e| ProductError::at(e, &url))?;

        let path = ctx
            .updater
            .write_asset(&product.slug, self.side, &asset.bytes)
            .map_err(|e| ProductError::at(e, &url))?;
        let touched = {
            let mut catalog = ctx.catalog.lock().await;
            ctx.updater.update(&mut catalog, &product.sku, self.side, &path)?
        };
        progress.advance(ProductState::Cataloged);
        Ok(touched)
    }

    /// Record an asset file that is already on disk under the product's slug. No network.
    async fn adopt(
        &self,
        ctx: &PipelineContext,
        product: &ProductRecord,
        path: &Path,
        progress: &mut ProductProgress,
    ) -> Result<(), ProductError> {
        if ctx.dry_run {
            info!(sku = %product.sku, path = %path.display(), "dry run: would record existing asset");
            return Ok(());
        }
        let touched = {
            let mut catalog = ctx.catalog.lock().await;
            ctx.updater.update(&mut catalog, &product.sku, self.side, path)?
        };
        progress.advance(ProductState::Cataloged);
        info!(
            sku = %product.sku,
            path = %path.display(),
            touched = touched.len(),
            "existing asset recorded"
        );
        Ok(())
    }
}

#[async_trait]
impl ProductWorker for CoverWorker {
    fn name(&self) -> &'static str {
        match self.side {
            AssetSide::Front => "covers",
            AssetSide::Back => "back_covers",
        }
    }

    fn is_done(&self, ctx: &PipelineContext, product: &ProductRecord) -> bool {
        ctx.updater.is_resolved(product, self.side)
    }

    async fn process(
        &self,
        ctx: &PipelineContext,
        product: &ProductRecord,
        progress: &mut ProductProgress,
    ) -> Result<(), ProductError> {
        if let Some(path) = ctx.updater.unrecorded_asset(product, self.side) {
            return self.adopt(ctx, product, &path, progress).await;
        }
        progress.advance(ProductState::Resolving);
        let mut candidate_error: Option<ProductError> = None;
        let mut strategy_error: Option<ResolveError> = None;

        for strategy in self.chain.strategies_for(self.side) {
            let ranking = match self.chain.ranked(strategy, product, self.side).await {
                Ok(ranking) => ranking,
                Err(e) => {
                    warn!(sku = %product.sku, strategy = strategy.name(), error = %e, "strategy failed");
                    strategy_error = Some(e);
                    continue;
                }
            };
            if ranking.accepted.is_empty() {
                debug!(sku = %product.sku, strategy = strategy.name(), rejected = ranking.rejected.len(), "no accepted candidates");
                continue;
            }
            progress.advance(ProductState::Scoring);

            for candidate in &ranking.accepted {
                if ctx.dry_run {
                    info!(
                        sku = %product.sku,
                        strategy = strategy.name(),
                        locator = %candidate.locator,
                        score = candidate.score,
                        "dry run: would fetch"
                    );
                    return Ok(());
                }
                match self.try_candidate(ctx, product, candidate, progress).await {
                    Ok(touched) => {
                        info!(
                            sku = %product.sku,
                            strategy = strategy.name(),
                            locator = %candidate.locator,
                            touched = touched.len(),
                            "asset cataloged"
                        );
                        return Ok(());
                    }
                    Err(e) if matches!(e.error, ResolveError::Catalog { .. }) => return Err(e),
                    Err(e) => {
                        warn!(
                            sku = %product.sku,
                            strategy = strategy.name(),
                            locator = e.locator.as_deref().unwrap_or(&candidate.locator),
                            error = %e.error,
                            "candidate failed"
                        );
                        candidate_error = Some(e);
                    }
                }
            }
        }

        Err(candidate_error
            .or_else(|| strategy_error.map(ProductError::from))
            .unwrap_or_else(|| {
                ResolveError::not_found(format!("no accepted {} candidate", self.side)).into()
            }))
    }
}

/// Quotes a trade-in price and writes it into the catalog record.
pub struct PriceWorker {
    resolver: PriceResolver,
    refresh: bool,
    quotes: StdMutex<Vec<PriceQuote>>,
}

impl PriceWorker {
    pub fn new(resolver: PriceResolver, refresh: bool) -> Self {
        Self {
            resolver,
            refresh,
            quotes: StdMutex::new(Vec::new()),
        }
    }

    pub fn from_context(ctx: &PipelineContext, refresh: bool) -> Self {
        let settings = &ctx.settings;
        let vendor = Arc::new(PriceCharting::new(
            ctx.http.clone(),
            &settings.endpoints.pricecharting,
            RetryPolicy::from_settings(&settings.http),
        ));
        Self::new(
            PriceResolver::new(vendor, ctx.tables.clone(), settings.pricing),
            refresh,
        )
    }

    /// Quotes gathered so far, in completion order.
    pub fn quotes(&self) -> Vec<PriceQuote> {
        match self.quotes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ProductWorker for PriceWorker {
    fn name(&self) -> &'static str {
        "prices"
    }

    fn is_done(&self, _ctx: &PipelineContext, product: &ProductRecord) -> bool {
        !self.refresh && product.trade_in_price.is_some_and(|p| p > 0.0)
    }

    async fn process(
        &self,
        ctx: &PipelineContext,
        product: &ProductRecord,
        progress: &mut ProductProgress,
    ) -> Result<(), ProductError> {
        progress.advance(ProductState::Resolving);
        let quote = self
            .resolver
            .quote(product)
            .await?;
        progress.advance(ProductState::Fetching);
        if !ctx.dry_run {
            let mut catalog = ctx.catalog.lock().await;
            ctx.updater
                .apply_price(&mut catalog, &quote)
                .map_err(|e| ProductError::at(e, &quote.source_url))?;
        }
        match self.quotes.lock() {
            Ok(mut guard) => guard.push(quote),
            Err(poisoned) => poisoned.into_inner().push(quote),
        }
        progress.advance(ProductState::Cataloged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::updater::CatalogUpdater;
    use crate::catalog::CatalogStore;
    use crate::config::{LookupTables, OverrideEntry, PipelineSettings};
    use crate::error::FailureKind;
    use crate::ledger::FailureLedger;
    use crate::resolve::LocatorKind;
    use crate::test_support::{jpeg_bytes, product, FakeHttp, FakeReply};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn context(
        dir: &Path,
        products: Vec<ProductRecord>,
        tables: LookupTables,
        http: Arc<FakeHttp>,
    ) -> Arc<PipelineContext> {
        let mut settings = PipelineSettings::default();
        settings.catalog_path = dir.join("products.json");
        settings.asset_dir = dir.join("assets");
        settings.http.retries = 0;
        settings.concurrency = 2;
        let catalog = CatalogStore::from_records(&settings.catalog_path, products).unwrap();
        let updater = CatalogUpdater::new(
            settings.asset_dir.clone(),
            &settings.public_prefix,
            settings.normalizer.format.extension(),
            tables.alternate_spellings.clone(),
        );
        Arc::new(PipelineContext {
            settings,
            tables: Arc::new(tables),
            http,
            catalog: Arc::new(Mutex::new(catalog)),
            ledger: Arc::new(FailureLedger::new()),
            updater: Arc::new(updater),
            cancel: Arc::new(AtomicBool::new(false)),
            dry_run: false,
        })
    }

    fn override_to(tables: &mut LookupTables, sku: &str, url: &str) {
        tables.manual_overrides.insert(
            sku.to_string(),
            vec![OverrideEntry {
                locator: url.to_string(),
                kind: LocatorKind::Url,
                side: AssetSide::Front,
            }],
        );
    }

    async fn run_covers(ctx: &Arc<PipelineContext>) -> RunSummary {
        let worker = Arc::new(CoverWorker::from_context(ctx, AssetSide::Front));
        let products = ctx.catalog.lock().await.products().to_vec();
        BatchDriver::new(ctx.clone()).run(worker, products).await.unwrap()
    }

    #[tokio::test]
    async fn resolved_products_are_skipped_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let mut done = product("SW-001", "Super Mario Odyssey", "Nintendo Switch");
        done.image = Some("/images/products/mario-odyssey-hand-picked.png".to_string());
        let todo = product("SW-002", "Splatoon 2", "Nintendo Switch");
        let mut tables = LookupTables::default();
        override_to(&mut tables, "SW-001", "https://cdn.test/odyssey.jpg");
        override_to(&mut tables, "SW-002", "https://cdn.test/splatoon.jpg");
        let http = Arc::new(
            FakeHttp::new()
                .reply("odyssey.jpg", FakeReply::ok(jpeg_bytes(600, 600)))
                .reply("splatoon.jpg", FakeReply::ok(jpeg_bytes(600, 600))),
        );
        let ctx = context(dir.path(), vec![done.clone(), todo], tables, http.clone());
        let existing = dir.path().join("assets/mario-odyssey-hand-picked.png");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"already here").unwrap();

        let first = run_covers(&ctx).await;
        assert_eq!(first.skipped, vec!["SW-001".to_string()]);
        assert_eq!(first.succeeded, vec!["SW-002".to_string()]);
        assert_eq!(http.calls(), vec!["https://cdn.test/splatoon.jpg".to_string()]);
        assert!(!ctx.updater.asset_path(&done.slug, AssetSide::Front).exists());

        let written = std::fs::read(ctx.updater.asset_path("splatoon-2", AssetSide::Front)).unwrap();
        let catalog_bytes = std::fs::read(dir.path().join("products.json")).unwrap();
        let second = run_covers(&ctx).await;
        assert_eq!(second.skipped.len(), 2);
        assert_eq!(http.calls().len(), 1);
        assert_eq!(
            std::fs::read(ctx.updater.asset_path("splatoon-2", AssetSide::Front)).unwrap(),
            written
        );
        assert_eq!(std::fs::read(dir.path().join("products.json")).unwrap(), catalog_bytes);
        let catalog = ctx.catalog.lock().await;
        assert_eq!(catalog.get("SW-001").unwrap().image, done.image);
        assert_eq!(
            catalog.get("SW-002").unwrap().image.as_deref(),
            Some("/images/products/splatoon-2.webp")
        );
    }

    #[tokio::test]
    async fn asset_on_disk_without_catalog_path_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let stranded = product("WII-007", "Mario Kart Wii", "Nintendo Wii");
        let mut tables = LookupTables::default();
        override_to(&mut tables, "WII-007", "https://cdn.test/mkwii.jpg");
        let http = Arc::new(FakeHttp::new());
        let ctx = context(dir.path(), vec![stranded.clone()], tables, http.clone());
        let written = ctx
            .updater
            .write_asset(&stranded.slug, AssetSide::Front, b"normalized earlier")
            .unwrap();

        let first = run_covers(&ctx).await;
        assert_eq!(first.succeeded, vec!["WII-007".to_string()]);
        assert!(http.calls().is_empty());
        assert_eq!(std::fs::read(&written).unwrap(), b"normalized earlier");
        let on_disk = CatalogStore::load(&dir.path().join("products.json")).unwrap();
        assert_eq!(
            on_disk.get("WII-007").unwrap().image.as_deref(),
            Some("/images/products/mario-kart-wii.webp")
        );

        let second = run_covers(&ctx).await;
        assert_eq!(second.skipped, vec!["WII-007".to_string()]);
        assert!(http.calls().is_empty());
    }

    #[tokio::test]
    async fn skipped_products_leave_the_failures_file() {
        let dir = tempfile::tempdir().unwrap();
        let failures = dir.path().join("cover-download-failures.json");
        let mut fixed = product("A", "Alpha Quest", "Nintendo Wii");
        let earlier = FailureLedger::new();
        earlier.record(FailureRecord::new(
            &fixed,
            None,
            &ResolveError::not_found("no accepted front candidate"),
        ));
        earlier.record(FailureRecord::new(
            &product("B", "Bravo Racing", "Nintendo Wii"),
            None,
            &ResolveError::not_found("no accepted front candidate"),
        ));
        earlier.merge_into_file(&failures, &Default::default()).unwrap();

        fixed.image = Some("/images/products/alpha-quest.webp".to_string());
        let ctx = context(dir.path(), vec![fixed], LookupTables::default(), Arc::new(FakeHttp::new()));
        ctx.updater
            .write_asset("alpha-quest", AssetSide::Front, b"placed by hand")
            .unwrap();
        let summary = run_covers(&ctx).await;
        assert_eq!(summary.skipped, vec!["A".to_string()]);

        ctx.ledger.merge_into_file(&failures, &summary.settled()).unwrap();
        let remaining: Vec<String> = FailureLedger::load(&failures)
            .unwrap()
            .into_iter()
            .map(|r| r.sku)
            .collect();
        assert_eq!(remaining, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = LookupTables::default();
        override_to(&mut tables, "A", "https://cdn.test/a.jpg");
        override_to(&mut tables, "B", "https://cdn.test/b.jpg");
        override_to(&mut tables, "C", "https://cdn.test/c.jpg");
        let http = Arc::new(
            FakeHttp::new()
                .reply("cdn.test/a.jpg", FakeReply::ok(jpeg_bytes(400, 500)))
                .reply("cdn.test/c.jpg", FakeReply::ok(jpeg_bytes(500, 400))),
        );
        let products = vec![
            product("A", "Alpha Quest", "Nintendo Wii"),
            product("B", "Bravo Racing", "Nintendo Wii"),
            product("C", "Charlie Party", "Nintendo Wii"),
        ];
        let ctx = context(dir.path(), products, tables, http);
        let summary = run_covers(&ctx).await;

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exit_code(), 2);
        let failures = ctx.ledger.snapshot();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sku, "B");
        assert_eq!(failures[0].kind, FailureKind::Network);
        assert_eq!(failures[0].locator.as_deref(), Some("https://cdn.test/b.jpg"));

        let on_disk = CatalogStore::load(&dir.path().join("products.json")).unwrap();
        assert!(on_disk.get("A").unwrap().image.is_some());
        assert!(on_disk.get("B").unwrap().image.is_none());
    }

    #[tokio::test]
    async fn downloads_are_staged_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = LookupTables::default();
        override_to(&mut tables, "A", "https://cdn.test/a.jpg");
        override_to(&mut tables, "B", "https://cdn.test/b.jpg");
        override_to(&mut tables, "C", "https://cdn.test/c.jpg");
        let http = Arc::new(
            FakeHttp::new()
                .reply("cdn.test/a.jpg", FakeReply::ok(jpeg_bytes(400, 400)))
                .reply("cdn.test/b.jpg", FakeReply::ok(vec![0u8; 43]))
                .reply("cdn.test/c.jpg", FakeReply::ok(vec![0u8; 4096])),
        );
        let products = vec![
            product("A", "Alpha Quest", "Nintendo Wii"),
            product("B", "Bravo Racing", "Nintendo Wii"),
            product("C", "Charlie Party", "Nintendo Wii"),
        ];
        let ctx = context(dir.path(), products, tables, http);
        let summary = run_covers(&ctx).await;

        assert_eq!(summary.succeeded, vec!["A".to_string()]);
        assert_eq!(summary.failed, 2);
        for failure in ctx.ledger.snapshot() {
            assert_eq!(failure.kind, FailureKind::Validation, "{failure:?}");
        }
        assert!(ctx.updater.asset_path("alpha-quest", AssetSide::Front).is_file());
        let staging = ctx.updater.download_path("alpha-quest", AssetSide::Front);
        let left: Vec<_> = std::fs::read_dir(staging.parent().unwrap())
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default();
        assert!(left.is_empty(), "{left:?}");
    }

    #[tokio::test]
    async fn failed_override_falls_through_to_later_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = LookupTables::default();
        override_to(&mut tables, "WII-001", "https://cdn.test/broken.jpg");
        tables
            .price
            .platform_slugs
            .insert("Nintendo Wii".into(), "pal-wii".into());
        let http = Arc::new(
            FakeHttp::new()
                .reply("/game/pal-wii/wii-sports", FakeReply::ok(
                    r#"<img src="https://storage.googleapis.com/images.pricecharting.com/ws/1600.jpg">"#,
                ))
                .reply("images.pricecharting.com/ws/1600.jpg", FakeReply::ok(jpeg_bytes(700, 700))),
        );
        let ctx = context(
            dir.path(),
            vec![product("WII-001", "Wii Sports", "Nintendo Wii")],
            tables,
            http.clone(),
        );
        let summary = run_covers(&ctx).await;
        assert_eq!(summary.succeeded, vec!["WII-001".to_string()]);
        let calls = http.calls();
        assert_eq!(calls[0], "https://cdn.test/broken.jpg");
        assert!(ctx.ledger.is_empty());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = LookupTables::default();
        override_to(&mut tables, "SW-002", "https://cdn.test/splatoon.jpg");
        let http = Arc::new(FakeHttp::new());
        let ctx = {
            let ctx = context(
                dir.path(),
                vec![product("SW-002", "Splatoon 2", "Nintendo Switch")],
                tables,
                http.clone(),
            );
            let mut inner = Arc::try_unwrap(ctx).ok().unwrap();
            inner.dry_run = true;
            Arc::new(inner)
        };
        let summary = run_covers(&ctx).await;
        assert_eq!(summary.succeeded.len(), 1);
        assert!(http.calls().is_empty());
        assert!(!dir.path().join("assets").exists());
        assert!(!dir.path().join("products.json").exists());
    }

    struct Stalls;

    #[async_trait]
    impl ProductWorker for Stalls {
        fn name(&self) -> &'static str {
            "stalls"
        }

        fn is_done(&self, _ctx: &PipelineContext, _product: &ProductRecord) -> bool {
            false
        }

        async fn process(
            &self,
            _ctx: &PipelineContext,
            _product: &ProductRecord,
            progress: &mut ProductProgress,
        ) -> Result<(), ProductError> {
            progress.advance(ProductState::Fetching);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn budget_expiry_is_a_timeout_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = {
            let ctx = context(
                dir.path(),
                vec![product("X", "Slow Game", "Nintendo Wii")],
                LookupTables::default(),
                Arc::new(FakeHttp::new()),
            );
            let mut inner = Arc::try_unwrap(ctx).ok().unwrap();
            inner.settings.product_budget = Duration::from_millis(20);
            Arc::new(inner)
        };
        let products = ctx.catalog.lock().await.products().to_vec();
        let summary = BatchDriver::new(ctx.clone())
            .run(Arc::new(Stalls), products)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(ctx.ledger.snapshot()[0].kind, FailureKind::Timeout);
    }

    /// Records a cover for each product without touching the network, noting how many
    /// covers the catalog on disk already held when each product started.
    #[derive(Default)]
    struct WritesCover {
        cancel_after_first: bool,
        seen_on_disk: StdMutex<Vec<usize>>,
    }

    #[async_trait]
    impl ProductWorker for WritesCover {
        fn name(&self) -> &'static str {
            "writes_cover"
        }

        fn is_done(&self, _ctx: &PipelineContext, _product: &ProductRecord) -> bool {
            false
        }

        async fn process(
            &self,
            ctx: &PipelineContext,
            product: &ProductRecord,
            _progress: &mut ProductProgress,
        ) -> Result<(), ProductError> {
            let seen = CatalogStore::load(&ctx.settings.catalog_path)
                .map(|c| c.products().iter().filter(|p| p.image.is_some()).count())
                .unwrap_or(0);
            self.seen_on_disk.lock().unwrap().push(seen);
            let path = ctx.updater.write_asset(&product.slug, AssetSide::Front, b"cover")?;
            {
                let mut catalog = ctx.catalog.lock().await;
                ctx.updater.update(&mut catalog, &product.sku, AssetSide::Front, &path)?;
            }
            if self.cancel_after_first {
                ctx.cancel.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn sequential(dir: &Path, checkpoint_every: usize) -> Arc<PipelineContext> {
        let products = vec![
            product("A", "Alpha Quest", "Nintendo Wii"),
            product("B", "Bravo Racing", "Nintendo Wii"),
            product("C", "Charlie Party", "Nintendo Wii"),
        ];
        let ctx = context(dir, products, LookupTables::default(), Arc::new(FakeHttp::new()));
        let mut inner = Arc::try_unwrap(ctx).ok().unwrap();
        inner.settings.concurrency = 1;
        inner.settings.checkpoint_every = checkpoint_every;
        Arc::new(inner)
    }

    #[tokio::test]
    async fn checkpoints_persist_the_catalog_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = sequential(dir.path(), 1);
        let worker = Arc::new(WritesCover::default());
        let products = ctx.catalog.lock().await.products().to_vec();
        let summary = BatchDriver::new(ctx.clone())
            .run(worker.clone(), products)
            .await
            .unwrap();
        assert_eq!(summary.succeeded.len(), 3);
        assert_eq!(*worker.seen_on_disk.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancellation_keeps_finished_work_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = sequential(dir.path(), 0);
        let worker = Arc::new(WritesCover {
            cancel_after_first: true,
            ..Default::default()
        });
        let products = ctx.catalog.lock().await.products().to_vec();
        let summary = BatchDriver::new(ctx.clone())
            .run(worker.clone(), products)
            .await
            .unwrap();
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(worker.seen_on_disk.lock().unwrap().len(), 1);

        let on_disk = CatalogStore::load(&dir.path().join("products.json")).unwrap();
        let done = &summary.succeeded[0];
        assert!(on_disk.get(done).unwrap().image.is_some());
        let untouched = on_disk.products().iter().filter(|p| p.image.is_none()).count();
        assert_eq!(untouched, 2);
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(FakeHttp::new());
        let ctx = context(
            dir.path(),
            vec![product("A", "Alpha Quest", "Nintendo Wii")],
            LookupTables::default(),
            http.clone(),
        );
        ctx.cancel.store(true, Ordering::SeqCst);
        let summary = run_covers(&ctx).await;
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.exit_code(), 0);
        assert!(http.calls().is_empty());
    }

    #[tokio::test]
    async fn prices_are_written_in_major_units_and_priced_products_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = LookupTables::default();
        tables
            .price
            .platform_slugs
            .insert("Nintendo Wii".into(), "pal-wii".into());
        let http = Arc::new(FakeHttp::new().reply(
            "/game/pal-wii/wii-sports",
            FakeReply::ok(r#"VGPC.chart_data = {"used":[[1,1168]],"cib":[[1,2400]],"new":[]};"#),
        ));
        let mut priced = product("WII-002", "Wii Play", "Nintendo Wii");
        priced.trade_in_price = Some(3.5);
        let ctx = context(
            dir.path(),
            vec![product("WII-001", "Wii Sports", "Nintendo Wii"), priced],
            tables,
            http.clone(),
        );
        let worker = Arc::new(PriceWorker::from_context(&ctx, false));
        let products = ctx.catalog.lock().await.products().to_vec();
        let summary = BatchDriver::new(ctx.clone())
            .run(worker.clone(), products)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, vec!["WII-001".to_string()]);
        assert_eq!(summary.skipped, vec!["WII-002".to_string()]);
        assert_eq!(worker.quotes()[0].trade_in, 450);

        let catalog = ctx.catalog.lock().await;
        let record = catalog.get("WII-001").unwrap();
        assert_eq!(record.trade_in_price, Some(4.5));
        assert_eq!(record.source_loose_price, Some(11.68));
        assert_eq!(http.calls_to("wii-play"), 0);
    }
}
