//! Batch orchestration: per-product state, the worker trait and the run context shared by
//! every worker task.

pub mod driver;
pub mod selection;
pub mod verify;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::catalog::updater::CatalogUpdater;
use crate::catalog::{CatalogStore, ProductRecord};
use crate::config::{LookupTables, PipelineSettings};
use crate::error::ResolveError;
use crate::http::HttpClient;
use crate::ledger::FailureLedger;

pub use driver::{install_cancel_handler, BatchDriver, CoverWorker, PriceWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProductState {
    Pending,
    Resolving,
    Scoring,
    Fetching,
    Normalizing,
    Cataloged,
    Failed,
}

impl ProductState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cataloged | Self::Failed)
    }
}

/// State of one product within a run. Only moves forward: retrying another candidate does
/// not take a product back to an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductProgress {
    state: ProductState,
}

impl Default for ProductProgress {
    fn default() -> Self {
        Self {
            state: ProductState::Pending,
        }
    }
}

impl ProductProgress {
    pub fn state(&self) -> ProductState {
        self.state
    }

    /// Returns whether the state changed.
    pub fn advance(&mut self, next: ProductState) -> bool {
        if self.state.is_terminal() || next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = ProductState::Failed;
        }
    }
}

/// A product-level failure plus the locator being worked on when it happened.
#[derive(Debug, Clone)]
pub struct ProductError {
    pub error: ResolveError,
    pub locator: Option<String>,
}

impl ProductError {
    pub fn at(error: ResolveError, locator: impl Into<String>) -> Self {
        Self {
            error,
            locator: Some(locator.into()),
        }
    }
}

impl From<ResolveError> for ProductError {
    fn from(error: ResolveError) -> Self {
        Self {
            error,
            locator: None,
        }
    }
}

/// Explicit run-wide state. Nothing in the pipeline reaches for globals.
pub struct PipelineContext {
    pub settings: PipelineSettings,
    pub tables: Arc<LookupTables>,
    pub http: Arc<dyn HttpClient>,
    pub catalog: Arc<Mutex<CatalogStore>>,
    pub ledger: Arc<FailureLedger>,
    pub updater: Arc<CatalogUpdater>,
    pub cancel: Arc<AtomicBool>,
    /// Resolve and score only; nothing is fetched or written.
    pub dry_run: bool,
}

impl PipelineContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait ProductWorker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Products already done are skipped before any network activity.
    fn is_done(&self, ctx: &PipelineContext, product: &ProductRecord) -> bool;

    async fn process(
        &self,
        ctx: &PipelineContext,
        product: &ProductRecord,
        progress: &mut ProductProgress,
    ) -> Result<(), ProductError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Skipped,
    Failed,
    /// Never started because the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn record(&mut self, sku: &str, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Succeeded => self.succeeded.push(sku.to_string()),
            Outcome::Skipped => self.skipped.push(sku.to_string()),
            Outcome::Failed => self.failed += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }

    /// SKUs that ended the run with their asset or price in place, whether written now or
    /// found already done. Stale failure entries for these are dropped.
    pub fn settled(&self) -> HashSet<String> {
        self.succeeded.iter().chain(&self.skipped).cloned().collect()
    }

    /// 0 when nothing failed, 2 for a partial run, 1 when everything attempted failed.
    pub fn exit_code(&self) -> i32 {
        match (self.failed, self.succeeded.len()) {
            (0, _) => 0,
            (_, 0) => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_moves_backwards() {
        let mut p = ProductProgress::default();
        assert!(p.advance(ProductState::Resolving));
        assert!(p.advance(ProductState::Fetching));
        assert!(!p.advance(ProductState::Scoring));
        assert_eq!(p.state(), ProductState::Fetching);
        assert!(p.advance(ProductState::Cataloged));
        p.fail();
        assert_eq!(p.state(), ProductState::Cataloged);
    }

    #[test]
    fn failure_is_terminal() {
        let mut p = ProductProgress::default();
        p.advance(ProductState::Normalizing);
        p.fail();
        assert!(!p.advance(ProductState::Cataloged));
        assert_eq!(p.state(), ProductState::Failed);
    }

    #[test]
    fn exit_code_reflects_partial_failure() {
        let mut s = RunSummary::default();
        s.record("A", Outcome::Skipped);
        assert_eq!(s.exit_code(), 0);
        s.record("B", Outcome::Failed);
        assert_eq!(s.exit_code(), 1);
        s.record("C", Outcome::Succeeded);
        assert_eq!(s.exit_code(), 2);
        s.record("D", Outcome::Cancelled);
        let settled = s.settled();
        assert_eq!(settled.len(), 2);
        assert!(settled.contains("A") && settled.contains("C"));
    }
}
