use std::sync::Arc;

use serde::Deserialize;

use crate::error::ResolveError;
use crate::http::{get_json, HttpClient, RetryPolicy};

/// Collections searched: scanned manuals/boxes live under texts, photos under image.
pub const MEDIA_TYPES: [&str; 2] = ["texts", "image"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArchiveItem {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<ArchiveItem>,
}

pub struct Archive {
    http: Arc<dyn HttpClient>,
    search_url: String,
    download_base: String,
    retry: RetryPolicy,
}

impl Archive {
    pub fn new(
        http: Arc<dyn HttpClient>,
        search_url: &str,
        download_base: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            search_url: search_url.to_string(),
            download_base: download_base.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub async fn search(
        &self,
        name: &str,
        media_type: &str,
        rows: usize,
    ) -> Result<Vec<ArchiveItem>, ResolveError> {
        let query = format!("\"{name}\" AND mediatype:{media_type}");
        let url = format!(
            "{}?q={}&fl%5B%5D=identifier&fl%5B%5D=title&rows={}&output=json",
            self.search_url,
            urlencoding::encode(&query),
            rows
        );
        let envelope: SearchEnvelope = get_json(self.http.as_ref(), &url, self.retry).await?;
        Ok(envelope.response.docs)
    }

    /// Conventional per-item thumbnail.
    pub fn thumbnail_url(&self, identifier: &str) -> String {
        format!(
            "{}/{}/__ia_thumb.jpg",
            self.download_base,
            urlencoding::encode(identifier)
        )
    }
}
