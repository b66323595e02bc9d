use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{info, warn};

use catalog_enrich::catalog::updater::CatalogUpdater;
use catalog_enrich::catalog::{AssetSide, CatalogStore};
use catalog_enrich::config::{LookupTables, PipelineSettings};
use catalog_enrich::http::ReqwestClient;
use catalog_enrich::ledger::FailureLedger;
use catalog_enrich::pipeline::selection::{plan_tiers, write_tier_files, BatchSelection};
use catalog_enrich::pipeline::verify::{
    verify_assets, write_verification_report, DEFAULT_MIN_ASSET_BYTES,
};
use catalog_enrich::pipeline::{
    install_cancel_handler, BatchDriver, CoverWorker, PipelineContext, PriceWorker,
    ProductWorker, RunSummary,
};
use catalog_enrich::pricing::write_price_report;
use catalog_enrich::rate_limit::HostLimiter;
use catalog_enrich::tracing::init_tracing;
use catalog_enrich::util::env;

#[derive(Parser, Debug)]
#[command(name = "enrich", version, about = "Cover art and trade-in price enrichment for the product catalog")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Catalog JSON file (default: ENRICH_CATALOG or src/data/products.json)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    /// Lookup tables JSON file
    #[arg(long, global = true)]
    tables: Option<PathBuf>,
    /// Directory normalized assets are written to
    #[arg(long, global = true)]
    assets: Option<PathBuf>,
    /// Products processed at once
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Only process the SKUs listed in this tier file
    #[arg(long, global = true, conflicts_with_all = ["failures", "sku"])]
    tier: Option<PathBuf>,
    /// Retry the SKUs listed in a previous failures file
    #[arg(long, global = true, conflicts_with = "sku")]
    failures: Option<PathBuf>,
    /// Only process these SKUs (repeatable or comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    sku: Vec<String>,
    /// Directory for failure files and reports
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,
    /// Resolve and score only; nothing is fetched or written
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Find, download and normalize cover art for products without it
    Covers {
        /// Which side of the box to resolve
        #[arg(long, default_value = "front")]
        side: AssetSide,
    },
    /// Quote trade-in prices from the pricing vendor
    Prices {
        /// Re-quote products that already carry a trade-in price
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Write difficulty tier files for products still missing a front cover
    Tiers,
    /// Audit the asset directory for missing, tiny and duplicated files
    Verify {
        /// Files smaller than this many bytes are flagged
        #[arg(long, default_value_t = DEFAULT_MIN_ASSET_BYTES)]
        min_bytes: u64,
    },
}

impl CommonArgs {
    fn apply(&self, settings: &mut PipelineSettings) {
        if let Some(p) = &self.catalog {
            settings.catalog_path = p.clone();
        }
        if let Some(p) = &self.tables {
            settings.tables_path = p.clone();
        }
        if let Some(p) = &self.assets {
            settings.asset_dir = p.clone();
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n.max(1);
        }
        if let Some(p) = &self.out_dir {
            settings.report_dir = p.clone();
        }
    }

    fn selection(&self) -> BatchSelection {
        if let Some(p) = &self.tier {
            BatchSelection::TierFile(p.clone())
        } else if let Some(p) = &self.failures {
            BatchSelection::FailuresFile(p.clone())
        } else if !self.sku.is_empty() {
            BatchSelection::Skus(self.sku.clone())
        } else {
            BatchSelection::All
        }
    }
}

fn failures_file_name(command: &Commands) -> &'static str {
    match command {
        Commands::Covers {
            side: AssetSide::Back,
        } => "cover-back-failures.json",
        Commands::Prices { .. } => "price-fetch-failures.json",
        _ => "cover-download-failures.json",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("catalog_enrich=info,warn")?;
    let cli = Cli::parse();

    let mut settings = PipelineSettings::from_env();
    cli.common.apply(&mut settings);
    let code = run(cli, settings).await?;
    std::process::exit(code);
}

async fn run(cli: Cli, settings: PipelineSettings) -> Result<i32> {
    let tables = LookupTables::load_or_default(&settings.tables_path)?;
    let catalog = CatalogStore::load(&settings.catalog_path)?;
    info!(
        catalog = %settings.catalog_path.display(),
        products = catalog.len(),
        tables = %settings.tables_path.display(),
        "catalog loaded"
    );
    let updater = CatalogUpdater::new(
        settings.asset_dir.clone(),
        &settings.public_prefix,
        settings.normalizer.format.extension(),
        tables.alternate_spellings.clone(),
    );

    match &cli.command {
        Commands::Tiers => {
            let missing = catalog
                .products()
                .iter()
                .filter(|p| !updater.is_resolved(p, AssetSide::Front));
            let plan = plan_tiers(missing, &tables.tiers);
            write_tier_files(&settings.report_dir, &plan)?;
            return Ok(0);
        }
        Commands::Verify { min_bytes } => {
            let report = verify_assets(catalog.products(), &settings.asset_dir, *min_bytes)?;
            write_verification_report(&settings.report_dir.join("asset-verification.json"), &report)?;
            return Ok(if report.is_clean() { 0 } else { 2 });
        }
        Commands::Covers { .. } | Commands::Prices { .. } => {}
    }

    let dry_run = cli.common.dry_run || env::env_flag("ENRICH_DRY_RUN", false);
    if !dry_run {
        catalog.ensure_writable()?;
        std::fs::create_dir_all(&settings.asset_dir)
            .with_context(|| format!("creating {}", settings.asset_dir.display()))?;
    }

    let ledger = Arc::new(FailureLedger::new());
    let products = cli.common.selection().select(&catalog, &ledger)?;
    let orphans = ledger.len();

    let limiter = Arc::new(HostLimiter::from_settings(&settings.http));
    let http = Arc::new(ReqwestClient::new(&settings.http, limiter)?);
    let report_dir = settings.report_dir.clone();
    let ctx = Arc::new(PipelineContext {
        settings,
        tables: Arc::new(tables),
        http,
        catalog: Arc::new(Mutex::new(catalog)),
        ledger: ledger.clone(),
        updater: Arc::new(updater),
        cancel: Arc::new(AtomicBool::new(false)),
        dry_run,
    });
    install_cancel_handler(ctx.cancel.clone());
    let driver = BatchDriver::new(ctx.clone());

    let mut summary = match &cli.command {
        Commands::Covers { side } => {
            let worker: Arc<dyn ProductWorker> = Arc::new(CoverWorker::from_context(&ctx, *side));
            driver.run(worker, products).await?
        }
        Commands::Prices { refresh } => {
            let worker = Arc::new(PriceWorker::from_context(&ctx, *refresh));
            let summary = driver.run(worker.clone(), products).await?;
            if !ctx.dry_run {
                write_price_report(&report_dir.join("price-data.json"), &worker.quotes())?;
            }
            summary
        }
        Commands::Tiers | Commands::Verify { .. } => RunSummary::default(),
    };
    summary.total += orphans;
    summary.failed += orphans;

    write_failures(&report_dir, failures_file_name(&cli.command), &ledger, &summary, ctx.dry_run)?;
    if ctx.is_cancelled() {
        warn!(cancelled = summary.cancelled, "run interrupted; rerun to pick up the rest");
    }
    Ok(summary.exit_code())
}

fn write_failures(
    dir: &Path,
    file: &str,
    ledger: &FailureLedger,
    summary: &RunSummary,
    dry_run: bool,
) -> Result<()> {
    let path = dir.join(file);
    if dry_run {
        info!(failures = ledger.len(), path = %path.display(), "dry run; failures file untouched");
        return Ok(());
    }
    ledger.merge_into_file(&path, &summary.settled())?;
    Ok(())
}
