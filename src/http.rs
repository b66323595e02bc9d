//! HTTP access behind a trait so strategies, the fetcher and their retry policy can be
//! exercised against an in-memory fake.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{redirect, Client};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::ResolveError;
use crate::rate_limit::HostLimiter;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ResolveError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ResolveError::parse(self.url.clone(), format!("invalid json: {e}")))
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Transport failures are errors; any HTTP status, including 4xx/5xx, is a response.
    async fn get(&self, url: &str) -> Result<HttpResponse, ResolveError>;

    /// Status of a HEAD request, used for cheap existence checks.
    async fn head(&self, url: &str) -> Result<u16, ResolveError>;
}

pub struct ReqwestClient {
    client: Client,
    limiter: Arc<HostLimiter>,
}

impl ReqwestClient {
    pub fn new(settings: &HttpSettings, limiter: Arc<HostLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .build()?;
        Ok(Self { client, limiter })
    }

    fn host_of(url: &str) -> Result<String, ResolveError> {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| ResolveError::validation(format!("not an absolute url: {url}")))
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, ResolveError> {
        let host = Self::host_of(url)?;
        let _permit = self.limiter.acquire(&host).await;
        debug!(host = %host, url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::from_reqwest(url, e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ResolveError::from_reqwest(url, e))?;
        Ok(HttpResponse {
            status,
            url: final_url,
            body,
        })
    }

    async fn head(&self, url: &str) -> Result<u16, ResolveError> {
        let host = Self::host_of(url)?;
        let _permit = self.limiter.acquire(&host).await;
        debug!(host = %host, url, "HEAD");
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ResolveError::from_reqwest(url, e))?;
        Ok(resp.status().as_u16())
    }
}

/// Bounded retry with linear backoff (`base × attempt`). Only transient failures are
/// retried; a definitive 4xx is returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &HttpSettings) -> Self {
        Self {
            retries: settings.retries,
            backoff_base: settings.backoff_base,
        }
    }

    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff_base: Duration::ZERO,
        }
    }
}

/// GET that treats any non-2xx status as a `Network` error carrying the status code.
pub async fn get_ok(
    http: &dyn HttpClient,
    url: &str,
    policy: RetryPolicy,
) -> Result<HttpResponse, ResolveError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match http.get(url).await {
            Ok(resp) if resp.is_success() => return Ok(resp),
            Ok(resp) => {
                ResolveError::network(url, Some(resp.status), format!("HTTP {}", resp.status))
            }
            Err(e) => e,
        };
        if !err.is_retryable() || attempt > policy.retries {
            return Err(err);
        }
        let backoff = policy.backoff_base.saturating_mul(attempt);
        debug!(url, attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying");
        sleep(backoff).await;
    }
}

pub async fn get_json<T: DeserializeOwned>(
    http: &dyn HttpClient,
    url: &str,
    policy: RetryPolicy,
) -> Result<T, ResolveError> {
    get_ok(http, url, policy).await?.json()
}
