//! Raw content transport.
//!
//! The downloader only needs "give me the bytes at this URL, or tell me the
//! status you got". [`HttpFetcher`] does that over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Fetch failures. Non-2xx answers keep their status so callers can
/// classify them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("status: {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport { .. } => None,
        }
    }
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP fetcher on a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("entity-notifier/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}

/// `<server>/contents/<id>`, tolerating a trailing slash on the server.
pub fn content_url(server: &str, id: &str) -> String {
    format!("{}/contents/{}", server.trim_end_matches('/'), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_url_joins_cleanly() {
        assert_eq!(
            content_url("https://peer.example/content/", "bafy1"),
            "https://peer.example/content/contents/bafy1"
        );
        assert_eq!(
            content_url("https://peer.example/content", "bafy1"),
            "https://peer.example/content/contents/bafy1"
        );
    }

    #[test]
    fn status_error_mentions_status() {
        let err = FetchError::Status {
            url: "u".into(),
            status: 404,
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().starts_with("status: 404"));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        let err = fetcher
            .fetch("http://127.0.0.1:9/contents/nothing")
            .await
            .unwrap_err();
        assert_eq!(err.status(), None);
    }
}
