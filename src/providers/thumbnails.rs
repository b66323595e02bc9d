use std::sync::Arc;

use crate::error::ResolveError;
use crate::http::HttpClient;

/// Community box-art repository laid out as `{system}/Named_Boxarts/{title}.png`.
pub struct Thumbnails {
    http: Arc<dyn HttpClient>,
    base: String,
}

impl Thumbnails {
    pub fn new(http: Arc<dyn HttpClient>, base: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, system: &str, title: &str) -> String {
        format!(
            "{}/{}/Named_Boxarts/{}.png",
            self.base,
            urlencoding::encode(system),
            urlencoding::encode(title)
        )
    }

    /// HEAD request; anything but 200 counts as absent.
    pub async fn exists(&self, url: &str) -> Result<bool, ResolveError> {
        Ok(self.http.head(url).await? == 200)
    }
}
