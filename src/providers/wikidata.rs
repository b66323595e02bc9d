use std::sync::Arc;

use serde_json::Value;

use crate::error::ResolveError;
use crate::http::{get_json, HttpClient, RetryPolicy};

/// Property holding an entity's representative image.
pub const DEPICTED_IMAGE: &str = "P18";

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub label: String,
    pub description: String,
}

pub struct Wikidata {
    http: Arc<dyn HttpClient>,
    api: String,
    file_path_base: String,
    retry: RetryPolicy,
}

impl Wikidata {
    pub fn new(
        http: Arc<dyn HttpClient>,
        api: &str,
        file_path_base: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            file_path_base: file_path_base.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub async fn search(&self, label: &str, limit: usize) -> Result<Vec<Entity>, ResolveError> {
        let url = format!(
            "{}?action=wbsearchentities&search={}&type=item&language=en&limit={}&format=json",
            self.api,
            urlencoding::encode(label),
            limit
        );
        let body: Value = get_json(self.http.as_ref(), &url, self.retry).await?;
        let hits = body
            .get("search")
            .and_then(Value::as_array)
            .ok_or_else(|| ResolveError::parse(&url, "missing search array"))?;
        Ok(hits
            .iter()
            .filter_map(|hit| {
                Some(Entity {
                    id: hit.get("id")?.as_str()?.to_string(),
                    label: hit
                        .get("label")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: hit
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    /// File name of the entity's depicted image, if it has one.
    pub async fn depicted_image(&self, entity_id: &str) -> Result<Option<String>, ResolveError> {
        let url = format!(
            "{}?action=wbgetclaims&entity={}&property={}&format=json",
            self.api,
            urlencoding::encode(entity_id),
            DEPICTED_IMAGE
        );
        let body: Value = get_json(self.http.as_ref(), &url, self.retry).await?;
        if body.get("claims").is_none() {
            return Err(ResolveError::parse(&url, "missing claims object"));
        }
        Ok(body["claims"][DEPICTED_IMAGE]
            .as_array()
            .and_then(|claims| claims.first())
            .and_then(|claim| claim["mainsnak"]["datavalue"]["value"].as_str())
            .map(str::to_string))
    }

    /// File-serving URL for a commons file name.
    pub fn file_url(&self, file_name: &str) -> String {
        let normalized = file_name.trim().replace(' ', "_");
        format!("{}/{}", self.file_path_base, urlencoding::encode(&normalized))
    }
}
