//! MediaWiki action API client, used for both the encyclopedia and the media commons.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ResolveError;
use crate::http::{get_json, HttpClient, RetryPolicy};

/// Namespace holding `File:` pages.
pub const FILE_NAMESPACE: u32 = 6;

/// Infobox keys checked in order; the first non-empty value wins.
pub const INFOBOX_IMAGE_FIELDS: [&str; 4] = ["image", "image_cover", "cover", "boxart"];

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub mime: Option<String>,
}

pub struct MediaWiki {
    http: Arc<dyn HttpClient>,
    api: String,
    retry: RetryPolicy,
}

impl MediaWiki {
    pub fn new(http: Arc<dyn HttpClient>, api: &str, retry: RetryPolicy) -> Self {
        Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            retry,
        }
    }

    fn query_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}?action=query&format=json", self.api);
        for (k, v) in params {
            url.push('&');
            url.push_str(k);
            url.push('=');
            url.push_str(&urlencoding::encode(v));
        }
        url
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Value, ResolveError> {
        let url = self.query_url(params);
        let body: Value = get_json(self.http.as_ref(), &url, self.retry).await?;
        if body.get("query").is_none() && body.get("batchcomplete").is_none() {
            return Err(ResolveError::parse(url, "response has no query object"));
        }
        Ok(body)
    }

    /// Page titles for a full-text search, best match first.
    pub async fn search(
        &self,
        text: &str,
        limit: usize,
        namespace: Option<u32>,
    ) -> Result<Vec<String>, ResolveError> {
        let limit = limit.to_string();
        let ns = namespace.map(|n| n.to_string());
        let mut params = vec![("list", "search"), ("srsearch", text), ("srlimit", limit.as_str())];
        if let Some(ns) = ns.as_deref() {
            params.push(("srnamespace", ns));
        }
        let body = self.query(&params).await?;
        let titles: Vec<String> = body["query"]["search"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|h| h.get("title").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        debug!(query = text, hits = titles.len(), "wiki search");
        Ok(titles)
    }

    /// `File:` titles of every image used on a page.
    pub async fn page_images(&self, title: &str) -> Result<Vec<String>, ResolveError> {
        let body = self
            .query(&[
                ("titles", title),
                ("prop", "images"),
                ("imlimit", "50"),
                ("redirects", "1"),
            ])
            .await?;
        let titles: Vec<String> = pages(&body)
            .flat_map(|page| {
                page.get("images")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            })
            .filter_map(|img| img.get("title").and_then(Value::as_str).map(str::to_string))
            .collect();
        Ok(titles)
    }

    /// Direct URL and dimensions of a `File:` page, if the file exists.
    pub async fn image_info(&self, file_title: &str) -> Result<Option<ImageInfo>, ResolveError> {
        let body = self
            .query(&[
                ("titles", file_title),
                ("prop", "imageinfo"),
                ("iiprop", "url|size|mime"),
            ])
            .await?;
        let info = pages(&body).find_map(|page| {
            let ii = page.get("imageinfo")?.as_array()?.first()?;
            Some(ImageInfo {
                url: ii.get("url")?.as_str()?.to_string(),
                width: ii.get("width").and_then(Value::as_u64).unwrap_or(0) as u32,
                height: ii.get("height").and_then(Value::as_u64).unwrap_or(0) as u32,
                mime: ii.get("mime").and_then(Value::as_str).map(str::to_string),
            })
        });
        Ok(info)
    }

    /// Raw wikitext of the lead section, where infoboxes live.
    pub async fn lead_wikitext(&self, title: &str) -> Result<Option<String>, ResolveError> {
        let body = self
            .query(&[
                ("titles", title),
                ("prop", "revisions"),
                ("rvprop", "content"),
                ("rvsection", "0"),
                ("rvslots", "main"),
                ("redirects", "1"),
            ])
            .await?;
        let text = pages(&body).find_map(|page| {
            let rev = page.get("revisions")?.as_array()?.first()?;
            let main = rev.get("slots").and_then(|s| s.get("main")).unwrap_or(rev);
            main.get("*")
                .or_else(|| main.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Ok(text)
    }
}

/// Existing pages of a query response; placeholders for missing titles are skipped.
fn pages(body: &Value) -> impl Iterator<Item = &Value> {
    body["query"]["pages"]
        .as_object()
        .into_iter()
        .flat_map(|m| m.iter())
        .filter(|(id, page)| id.as_str() != "-1" && page.get("missing").is_none())
        .map(|(_, page)| page)
}

/// First artwork file named by an infobox field, without link markup or namespace prefix.
pub fn infobox_image(wikitext: &str, fields: &[&str]) -> Option<String> {
    for field in fields {
        let pattern = format!(r"(?i)\|\s*{}\s*=\s*([^\n|{{}}]+)", regex::escape(field));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        for caps in re.captures_iter(wikitext) {
            let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if let Some(file) = clean_file_reference(raw) {
                return Some(file);
            }
        }
    }
    None
}

fn clean_file_reference(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    for prefix in ["[[File:", "[[Image:", "[[file:", "[[image:"] {
        if let Some(rest) = value.strip_prefix(prefix) {
            value = rest;
        }
    }
    let value = value.split("]]").next().unwrap_or(value);
    let value = value.split('|').next().unwrap_or(value);
    let mut value = value.trim();
    for prefix in ["File:", "Image:", "file:", "image:"] {
        if let Some(rest) = value.strip_prefix(prefix) {
            value = rest.trim();
        }
    }
    if value.len() <= 3 || value.contains('{') || value.contains('<') {
        return None;
    }
    Some(value.to_string())
}
