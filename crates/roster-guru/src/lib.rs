//! Client for the Guru subscription API: bearer-authenticated, cursor-paginated, fetch-everything.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use roster_core::{Subscription, SubscriptionPage};
use thiserror::Error;
use tracing::{info, info_span, Instrument};

pub const CRATE_NAME: &str = "roster-guru";

pub const DEFAULT_BASE_URL: &str = "https://digitalmanager.guru/api/v2";

#[derive(Debug, Clone)]
pub struct GuruClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
    pub user_agent: Option<String>,
}

impl Default for GuruClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            page_delay: Duration::from_millis(100),
            user_agent: Some(format!("roster-sync/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum GuruError {
    #[error("GURU_API_TOKEN is not configured")]
    MissingToken,
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding subscription page {page}: {source}")]
    Decode {
        page: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("subscription page {page} reports more pages but has no next_cursor")]
    MissingCursor { page: usize },
}

/// Anything that can produce the complete current subscription dataset.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Subscription>, GuruError>;
}

#[derive(Debug, Clone)]
pub struct GuruClient {
    client: reqwest::Client,
    subscriptions_url: String,
    token: String,
    page_delay: Duration,
}

impl GuruClient {
    /// Fails with [`GuruError::MissingToken`] before any request is made when no token is set.
    pub fn new(config: GuruClientConfig) -> Result<Self, GuruError> {
        let token = config
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(GuruError::MissingToken)?;

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(GuruError::Client)?;

        Ok(Self {
            client,
            subscriptions_url: format!("{}/subscriptions", config.base_url.trim_end_matches('/')),
            token,
            page_delay: config.page_delay,
        })
    }

    pub async fn fetch_page(
        &self,
        page: usize,
        cursor: Option<&str>,
    ) -> Result<SubscriptionPage, GuruError> {
        let mut request = self
            .client
            .get(&self.subscriptions_url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json");
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let resp = request.send().await.map_err(|source| GuruError::Request {
            url: self.subscriptions_url.clone(),
            source,
        })?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(GuruError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await.map_err(|source| GuruError::Request {
            url: final_url,
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| GuruError::Decode { page, source })
    }
}

#[async_trait]
impl SubscriptionSource for GuruClient {
    async fn fetch_all(&self) -> Result<Vec<Subscription>, GuruError> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page = 1usize;

        loop {
            let span = info_span!("guru_page", page, cursor = cursor.as_deref().unwrap_or(""));
            let current = self
                .fetch_page(page, cursor.as_deref())
                .instrument(span)
                .await?;

            subscriptions.extend(current.data);
            info!(
                page,
                fetched = subscriptions.len(),
                total_rows = current.total_rows.unwrap_or_default(),
                has_more_pages = current.has_more_pages,
                "fetched subscription page"
            );

            if !current.has_more_pages {
                break;
            }
            cursor = match current.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => Some(next),
                None => return Err(GuruError::MissingCursor { page }),
            };
            page += 1;
            tokio::time::sleep(self.page_delay).await;
        }

        Ok(subscriptions)
    }
}
