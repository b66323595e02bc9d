use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::HttpSettings;
use crate::error::ResolveError;
use crate::http::{get_ok, HttpClient, RetryPolicy};
use crate::util::fs::write_atomic;

/// Downloads candidate bodies. Timeouts, redirects and the user agent belong to the
/// underlying client; this layer adds retries and the minimum-size check.
#[derive(Clone)]
pub struct Fetcher {
    http: Arc<dyn HttpClient>,
    retry: RetryPolicy,
    min_bytes: usize,
}

impl Fetcher {
    pub fn new(http: Arc<dyn HttpClient>, retry: RetryPolicy, min_bytes: usize) -> Self {
        Self {
            http,
            retry,
            min_bytes,
        }
    }

    pub fn from_settings(http: Arc<dyn HttpClient>, settings: &HttpSettings) -> Self {
        Self::new(http, RetryPolicy::from_settings(settings), settings.min_bytes)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ResolveError> {
        let resp = get_ok(self.http.as_ref(), url, self.retry).await?;
        if resp.body.len() < self.min_bytes {
            return Err(ResolveError::validation(format!(
                "body of {} bytes from {url} is below the {} byte minimum",
                resp.body.len(),
                self.min_bytes
            )));
        }
        debug!(url, bytes = resp.body.len(), "fetched");
        Ok(resp.body)
    }

    /// Download into `destination`. Nothing is left behind on failure.
    pub async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, ResolveError> {
        let result = async {
            let body = self.fetch_bytes(url).await?;
            write_atomic(destination, &body).map_err(|e| {
                ResolveError::validation(format!("writing {}: {e}", destination.display()))
            })?;
            Ok(body.len() as u64)
        }
        .await;
        if result.is_err() && destination.exists() {
            if let Err(e) = std::fs::remove_file(destination) {
                warn!(path = %destination.display(), error = %e, "failed to remove partial download");
            }
        }
        result
    }
}
