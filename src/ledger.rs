//! Structured per-product failures, collected without interrupting a batch and written out
//! as the input for the next, narrower retry run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::ProductRecord;
use crate::error::{FailureKind, ResolveError};
use crate::util::fs::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub sku: String,
    pub name: String,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub reason: String,
    #[serde(default = "default_kind")]
    pub kind: FailureKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_kind() -> FailureKind {
    FailureKind::NotFound
}

impl FailureRecord {
    pub fn new(product: &ProductRecord, locator: Option<String>, error: &ResolveError) -> Self {
        Self {
            sku: product.sku.clone(),
            name: product.name.clone(),
            locator,
            reason: error.to_string(),
            kind: error.kind(),
            timestamp: Utc::now(),
        }
    }

    /// A selection entry that names no catalog record.
    pub fn orphan(sku: &str, name: Option<&str>) -> Self {
        let error = ResolveError::catalog(sku, "no catalog record for sku");
        Self {
            sku: sku.to_string(),
            name: name.unwrap_or_default().to_string(),
            locator: None,
            reason: error.to_string(),
            kind: error.kind(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FailureLedger {
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: FailureRecord) {
        warn!(
            sku = %record.sku,
            kind = record.kind.as_str(),
            reason = %record.reason,
            locator = record.locator.as_deref().unwrap_or("-"),
            "product failed"
        );
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    pub fn snapshot(&self) -> Vec<FailureRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_json(&self, path: &Path) -> Result<usize> {
        let records = self.snapshot();
        write_records(path, &records)?;
        info!(path = %path.display(), failures = records.len(), "failure ledger written");
        Ok(records.len())
    }

    pub fn load(path: &Path) -> Result<Vec<FailureRecord>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading failures file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing failures file {}", path.display()))
    }

    /// Merge this run into an existing failures file: entries for settled SKUs (succeeded
    /// or already done) are cleared, and the newest record per SKU wins.
    pub fn merge_into_file(&self, path: &Path, settled: &HashSet<String>) -> Result<usize> {
        let previous = if path.exists() {
            Self::load(path)?
        } else {
            Vec::new()
        };

        let mut merged: IndexMap<String, FailureRecord> = IndexMap::new();
        for record in previous.into_iter().chain(self.snapshot()) {
            if settled.contains(&record.sku) {
                continue;
            }
            merged.insert(record.sku.clone(), record);
        }
        let records: Vec<FailureRecord> = merged.into_values().collect();
        write_records(path, &records)?;
        info!(
            path = %path.display(),
            remaining = records.len(),
            cleared = settled.len(),
            "failures file merged"
        );
        Ok(records.len())
    }
}

fn write_records(path: &Path, records: &[FailureRecord]) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(records).context("serializing failure ledger")?;
    body.push(b'\n');
    write_atomic(path, &body).with_context(|| format!("writing failures file {}", path.display()))
}
