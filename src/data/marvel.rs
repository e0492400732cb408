//! Marvel API client
//!
//! This module provides the remote fetch collaborator: a [`MarvelService`]
//! trait describing the three catalog reads the cache layer relies on, and a
//! [`MarvelClient`] that performs them over HTTP with signed requests.

use async_trait::async_trait;
use chrono::Utc;
use md5::{Digest, Md5};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::{Character, Comic, MarvelResponse};

/// Base URL for the public Marvel API
pub const MARVEL_BASE_URL: &str = "https://gateway.marvel.com/v1/public";

/// Errors that can occur when talking to the Marvel API
#[derive(Debug, Error)]
pub enum MarvelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The API answered with a non-success status
    #[error("Marvel API returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// The API returned no result for a single-item request
    #[error("No result returned for {0}")]
    NotFound(String),
}

/// Credentials and endpoint for the Marvel API
///
/// Passed once to [`MarvelClient::new`]; nothing else reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarvelApiConfig {
    pub public_key: String,
    pub private_key: String,
    pub base_url: String,
}

impl MarvelApiConfig {
    /// Creates a config pointing at the public gateway
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
            base_url: MARVEL_BASE_URL.to_string(),
        }
    }

    /// Overrides the base URL (for proxies or tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Request signature: hex MD5 of timestamp, private key, and public key
    pub fn signature(&self, timestamp: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(timestamp.as_bytes());
        hasher.update(self.private_key.as_bytes());
        hasher.update(self.public_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Authentication query parameters for a request made at `timestamp`
    pub fn auth_params(&self, timestamp: &str) -> Vec<(&'static str, String)> {
        vec![
            ("apikey", self.public_key.clone()),
            ("ts", timestamp.to_string()),
            ("hash", self.signature(timestamp)),
        ]
    }
}

/// Catalog reads the cache layer consumes
#[async_trait]
pub trait MarvelService: Send + Sync {
    /// Fetches one page of the character listing
    async fn fetch_characters(&self, offset: u32, limit: u32) -> Result<Vec<Character>, MarvelError>;

    /// Fetches a single character
    async fn fetch_character(&self, id: i64) -> Result<Character, MarvelError>;

    /// Fetches one page of the comics a character appears in
    async fn fetch_character_comics(
        &self,
        character_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Comic>, MarvelError>;
}

/// The catalog endpoints used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Characters { offset: u32, limit: u32 },
    Character { id: i64 },
    CharacterComics { character_id: i64, offset: u32, limit: u32 },
}

impl Endpoint {
    /// Path relative to the API base URL
    pub fn path(&self) -> String {
        match self {
            Endpoint::Characters { .. } => "/characters".to_string(),
            Endpoint::Character { id } => format!("/characters/{}", id),
            Endpoint::CharacterComics { character_id, .. } => format!("/characters/{}/comics", character_id),
        }
    }

    /// Paging parameters, if the endpoint takes any
    pub fn paging(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::Characters { offset, limit } | Endpoint::CharacterComics { offset, limit, .. } => {
                vec![("offset", offset.to_string()), ("limit", limit.to_string())]
            }
            Endpoint::Character { .. } => Vec::new(),
        }
    }
}

/// Client for fetching catalog data from the Marvel API
#[derive(Debug, Clone)]
pub struct MarvelClient {
    client: Client,
    config: MarvelApiConfig,
}

impl MarvelClient {
    /// Create a new MarvelClient for the given credentials
    pub fn new(config: MarvelApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Create a new MarvelClient with a custom HTTP client
    pub fn with_client(client: Client, config: MarvelApiConfig) -> Self {
        Self { client, config }
    }

    /// Full URL and query string for `endpoint`, signed with `timestamp`
    pub fn request_parts(&self, endpoint: &Endpoint, timestamp: &str) -> (String, Vec<(&'static str, String)>) {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint.path());
        let mut params = self.config.auth_params(timestamp);
        params.extend(endpoint.paging());
        (url, params)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<MarvelResponse<T>, MarvelError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let (url, params) = self.request_parts(&endpoint, &timestamp);
        debug!(path = %endpoint.path(), "Requesting Marvel API");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(MarvelError::Status {
                code: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl MarvelService for MarvelClient {
    async fn fetch_characters(&self, offset: u32, limit: u32) -> Result<Vec<Character>, MarvelError> {
        let response = self.get::<Character>(Endpoint::Characters { offset, limit }).await?;
        Ok(response.data.results)
    }

    async fn fetch_character(&self, id: i64) -> Result<Character, MarvelError> {
        let response = self.get::<Character>(Endpoint::Character { id }).await?;
        response
            .data
            .results
            .into_iter()
            .next()
            .ok_or_else(|| MarvelError::NotFound(format!("character {}", id)))
    }

    async fn fetch_character_comics(
        &self,
        character_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Comic>, MarvelError> {
        let response = self
            .get::<Comic>(Endpoint::CharacterComics {
                character_id,
                offset,
                limit,
            })
            .await?;
        Ok(response.data.results)
    }
}

/// Pulls the `status` or `message` field out of an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("status")
                .or_else(|| value.get("message"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MarvelApiConfig {
        MarvelApiConfig::new("1234", "abcd")
    }

    #[test]
    fn test_signature_matches_marvel_documentation() {
        // Example from the Marvel developer docs: md5("1abcd1234")
        assert_eq!(test_config().signature("1"), "ffd275c5130566a2916217b101f26150");
    }

    #[test]
    fn test_auth_params_include_key_timestamp_and_hash() {
        let params = test_config().auth_params("1");

        assert_eq!(params[0], ("apikey", "1234".to_string()));
        assert_eq!(params[1], ("ts", "1".to_string()));
        assert_eq!(params[2].0, "hash");
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::Characters { offset: 0, limit: 20 }.path(), "/characters");
        assert_eq!(Endpoint::Character { id: 1009610 }.path(), "/characters/1009610");
        assert_eq!(
            Endpoint::CharacterComics {
                character_id: 5,
                offset: 0,
                limit: 20
            }
            .path(),
            "/characters/5/comics"
        );
    }

    #[test]
    fn test_single_character_endpoint_has_no_paging() {
        assert!(Endpoint::Character { id: 1 }.paging().is_empty());
    }

    #[test]
    fn test_request_parts_join_base_url_and_paging() {
        let client = MarvelClient::new(test_config().with_base_url("http://localhost:9999/v1/public/"));
        let (url, params) = client.request_parts(&Endpoint::Characters { offset: 40, limit: 20 }, "7");

        assert_eq!(url, "http://localhost:9999/v1/public/characters");
        assert!(params.contains(&("offset", "40".to_string())));
        assert!(params.contains(&("limit", "20".to_string())));
        assert!(params.contains(&("ts", "7".to_string())));
    }

    #[test]
    fn test_error_message_prefers_status_field() {
        assert_eq!(error_message(r#"{"code": "InvalidCredentials", "message": "bad key"}"#), "bad key");
        assert_eq!(error_message(r#"{"code": 404, "status": "We couldn't find that character"}"#), "We couldn't find that character");
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_failure() {
        let client = MarvelClient::new(test_config().with_base_url("http://127.0.0.1:1"));

        let result = client.fetch_characters(0, 20).await;

        assert!(matches!(result, Err(MarvelError::RequestFailed(_))));
    }
}
