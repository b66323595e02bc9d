//! Post-run audit of the asset directory: missing files, files too small to be real covers,
//! and byte-identical assets shared by unrelated products.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::catalog::{AssetSide, ProductRecord};
use crate::normalization::text::normalize_text;
use crate::util::fs::write_atomic;

/// Anything under this is almost always an error page or a placeholder.
pub const DEFAULT_MIN_ASSET_BYTES: u64 = 3_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IssueKind {
    Missing,
    Tiny { bytes: u64 },
    Duplicate { shared_with: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetIssue {
    pub sku: String,
    pub name: String,
    pub side: AssetSide,
    pub path: String,
    #[serde(flatten)]
    pub kind: IssueKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub issues: Vec<AssetIssue>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

struct Checked<'a> {
    product: &'a ProductRecord,
    side: AssetSide,
    path: String,
}

/// Audits every asset the catalog references. Files are resolved by name inside `asset_dir`,
/// so the public prefix stored in the record does not matter.
pub fn verify_assets(
    products: &[ProductRecord],
    asset_dir: &Path,
    min_bytes: u64,
) -> Result<VerificationReport> {
    let mut report = VerificationReport::default();
    let mut by_digest: BTreeMap<String, Vec<Checked<'_>>> = BTreeMap::new();

    for product in products {
        for side in [AssetSide::Front, AssetSide::Back] {
            let Some(stored) = product.asset(side) else {
                continue;
            };
            report.checked += 1;
            let file: PathBuf = match Path::new(stored).file_name() {
                Some(name) => asset_dir.join(name),
                None => asset_dir.join(stored),
            };
            let issue = |kind| AssetIssue {
                sku: product.sku.clone(),
                name: product.name.clone(),
                side,
                path: stored.to_string(),
                kind,
            };
            if !file.is_file() {
                report.issues.push(issue(IssueKind::Missing));
                continue;
            }
            let bytes = std::fs::read(&file)
                .with_context(|| format!("reading asset {}", file.display()))?;
            if (bytes.len() as u64) < min_bytes {
                report.issues.push(issue(IssueKind::Tiny {
                    bytes: bytes.len() as u64,
                }));
            }
            by_digest.entry(sha256_hex(&bytes)).or_default().push(Checked {
                product,
                side,
                path: stored.to_string(),
            });
        }
    }

    for group in by_digest.values().filter(|g| g.len() > 1) {
        // Variants of one product (same name) may legitimately share a photo.
        let first = normalize_text(&group[0].product.name);
        if group.iter().all(|c| normalize_text(&c.product.name) == first) {
            continue;
        }
        for checked in group {
            let shared_with = group
                .iter()
                .filter(|other| other.product.sku != checked.product.sku)
                .map(|other| other.product.sku.clone())
                .collect::<Vec<_>>();
            if shared_with.is_empty() {
                continue;
            }
            report.issues.push(AssetIssue {
                sku: checked.product.sku.clone(),
                name: checked.product.name.clone(),
                side: checked.side,
                path: checked.path.clone(),
                kind: IssueKind::Duplicate { shared_with },
            });
        }
    }

    if report.is_clean() {
        info!(checked = report.checked, "asset verification clean");
    } else {
        warn!(
            checked = report.checked,
            issues = report.issues.len(),
            "asset verification found issues"
        );
    }
    Ok(report)
}

pub fn write_verification_report(path: &Path, report: &VerificationReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("serializing verification report")?;
    write_atomic(path, &json).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "verification report written");
    Ok(())
}
