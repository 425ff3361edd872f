use std::time::Duration;

use async_trait::async_trait;
use common::models::Observation;

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedDocument {
    pub fn html(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            final_url: url.into(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.into(),
        }
    }
}

/// Retrieves raw HTML. The only suspension point of a check.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedDocument, FetchError>;
}

/// Read side of the observation history, most recent first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryLookup: Send + Sync {
    async fn recent(&self, target_id: i64, limit: usize) -> anyhow::Result<Vec<Observation>>;
}

/// Accepts HTML-ish and plain text bodies; a missing header is taken on trust.
pub fn is_supported_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return true;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.is_empty() || mime.starts_with("text/") || mime == "application/xhtml+xml"
}
