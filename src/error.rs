use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-product failure taxonomy. None of these abort a batch; fatal setup problems
/// (unreadable catalog, bad lookup tables) surface as `anyhow::Error` instead.
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("network error for {url}: {message}")]
    Network {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("catalog error for {sku}: {message}")]
    Catalog { sku: String, message: String },
    #[error("product budget of {budget:?} exhausted")]
    Timeout { budget: Duration },
}

impl ResolveError {
    pub fn network(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    pub fn catalog(sku: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            sku: sku.into(),
            message: message.into(),
        }
    }

    /// Transient network failures: no status (timeout, connect, body read), 5xx and 429.
    /// Any other 4xx is definitive for that locator.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { status: None, .. } => true,
            Self::Network {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Parse { .. } => FailureKind::Parse,
            Self::Validation { .. } => FailureKind::Validation,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Catalog { .. } => FailureKind::Catalog,
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }

    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else if err.is_redirect() {
            format!("too many redirects: {err}")
        } else {
            err.to_string()
        };
        Self::network(url, status, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Parse,
    Validation,
    NotFound,
    Catalog,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Catalog => "catalog",
            Self::Timeout => "timeout",
        }
    }
}
