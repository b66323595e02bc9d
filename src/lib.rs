//! Catalog enrichment: resolves, fetches and normalizes product cover art, and quotes
//! trade-in prices, writing both back into a JSON product catalog.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod ledger;
pub mod normalize;
pub mod pipeline;
pub mod pricing;
pub mod providers;
pub mod rate_limit;
pub mod resolve;
pub mod tracing;

pub mod normalization {
    pub mod platform;
    pub mod text;
}

pub mod util {
    pub mod env;
    pub mod fs;
}

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{AssetSide, CatalogStore, ProductRecord};
pub use error::{FailureKind, ResolveError};
