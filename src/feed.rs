//! Upstream message feed.
//!
//! The feed serves a group's history newest first, one page at a time, keyed
//! by a `before_id` cursor. [`FeedClient`] is the seam the ingestor talks to;
//! [`GroupMeClient`] is the HTTP implementation.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{debug, trace};

use crate::config::FeedConfig;
use crate::error::{Result, VaultError};
use crate::model::FeedPage;

/// Source of message pages, newest first.
pub trait FeedClient {
    /// Fetch the page of messages strictly older than `before_id`, or the
    /// newest page when `before_id` is `None`. An empty page means history is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns a feed error on transport failure, non-success status, or an
    /// undecodable body.
    fn fetch_page(&self, before_id: Option<&str>) -> Result<FeedPage>;
}

impl<T: FeedClient + ?Sized> FeedClient for &T {
    fn fetch_page(&self, before_id: Option<&str>) -> Result<FeedPage> {
        (**self).fetch_page(before_id)
    }
}

/// Blocking HTTP client for the GroupMe v3 messages endpoint.
pub struct GroupMeClient {
    http: Client,
    endpoint: String,
    token: String,
    page_size: u32,
}

impl std::fmt::Debug for GroupMeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupMeClient")
            .field("endpoint", &self.endpoint)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl GroupMeClient {
    /// Build a client from feed settings.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EnvVarError`] if the token or group id is unset,
    /// or a feed error if the HTTP client cannot be constructed.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| VaultError::env_var("GROUPME_TOKEN", "access token is not set"))?;
        let group_id = config
            .group_id
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| VaultError::env_var("GROUPME_GROUP_ID", "group id is not set"))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("groupvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VaultError::feed(e.without_url().to_string()))?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/groups/{}/messages",
                config.base_url.trim_end_matches('/'),
                group_id
            ),
            token: token.to_string(),
            page_size: config.page_size,
        })
    }

    /// The messages endpoint, without credentials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FeedClient for GroupMeClient {
    fn fetch_page(&self, before_id: Option<&str>) -> Result<FeedPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("token", self.token.clone()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(cursor) = before_id {
            query.push(("before_id", cursor.to_string()));
        }
        debug!(endpoint = %self.endpoint, before_id, "Fetching feed page");

        // reqwest errors carry the full URL, token included.
        let response = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .map_err(|e| VaultError::feed(e.without_url().to_string()))?;

        let status = response.status();
        // Upstream signals "nothing older" with 304.
        if status == StatusCode::NOT_MODIFIED {
            debug!(before_id, "Feed returned 304; history exhausted");
            return Ok(FeedPage::default());
        }
        if !status.is_success() {
            return Err(VaultError::FeedStatus {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let body = response
            .bytes()
            .map_err(|e| VaultError::feed(e.without_url().to_string()))?;
        trace!(bytes = body.len(), "Feed page received");
        decode_page(&body)
    }
}

/// Decode a feed body, with or without the `{"response": ...}` envelope.
///
/// A `null` response decodes to an empty page.
///
/// # Errors
///
/// Returns [`VaultError::FeedDecode`] if the body is not a message page.
pub fn decode_page(body: &[u8]) -> Result<FeedPage> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;
    let page = match value.get_mut("response").map(serde_json::Value::take) {
        Some(serde_json::Value::Null) => FeedPage::default(),
        Some(inner) => serde_json::from_value(inner)?,
        None => serde_json::from_value(value)?,
    };
    Ok(page)
}
