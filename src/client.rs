//! Client side of the aggregator RPC surface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use crate::codec::CodecError;
use crate::records::Snapshot;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid aggregator url '{0}'")]
    InvalidUrl(String),
    #[error("invalid queue name '{0}'")]
    InvalidQueue(String),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("aggregator answered {status} for {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Operations a collector or query tool performs against the aggregator.
#[async_trait]
pub trait AggregatorClient: Send + Sync {
    /// Appends an encoded record to `queue`.
    async fn put_data(&self, queue: &str, payload: Vec<u8>) -> Result<(), ClientError>;

    /// Every pending payload of `queue`, oldest first, without consuming them.
    async fn get_data(&self, queue: &str) -> Result<Vec<Vec<u8>>, ClientError>;

    async fn get_snapshots(&self, low: f64, high: f64) -> Result<Vec<Snapshot>, ClientError>;

    async fn delete_all_snapshots(&self) -> Result<(), ClientError>;
}

pub fn validate_queue_name(queue: &str) -> Result<(), ClientError> {
    if queue.trim().is_empty() || queue.chars().any(char::is_control) {
        return Err(ClientError::InvalidQueue(queue.to_string()));
    }
    Ok(())
}

/// [`AggregatorClient`] speaking to a remote aggregator over HTTP.
#[derive(Clone)]
pub struct HttpAggregatorClient {
    base: Url,
    http: reqwest::Client,
}

impl HttpAggregatorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Http {
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self { base, http })
    }

    /// Joins path segments onto the base URL, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<reqwest::Response, ClientError> {
        let http_err = |source| ClientError::Http {
            url: url.to_string(),
            source,
        };
        let resp = request.send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }
        debug!(%url, %status, "aggregator request done");
        Ok(resp)
    }
}

#[async_trait]
impl AggregatorClient for HttpAggregatorClient {
    async fn put_data(&self, queue: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        validate_queue_name(queue)?;
        let url = self.endpoint(&["queues", queue])?;
        let request = self
            .http
            .post(url.clone())
            .header("Content-Type", "application/octet-stream")
            .body(payload);
        self.send(request, &url).await?;
        Ok(())
    }

    async fn get_data(&self, queue: &str) -> Result<Vec<Vec<u8>>, ClientError> {
        validate_queue_name(queue)?;
        let url = self.endpoint(&["queues", queue])?;
        let resp = self.send(self.http.get(url.clone()), &url).await?;
        resp.json()
            .await
            .map_err(|source| ClientError::Http {
                url: url.to_string(),
                source,
            })
    }

    async fn get_snapshots(&self, low: f64, high: f64) -> Result<Vec<Snapshot>, ClientError> {
        let mut url = self.endpoint(&["snapshots"])?;
        url.query_pairs_mut()
            .append_pair("low", &low.to_string())
            .append_pair("high", &high.to_string());
        let resp = self.send(self.http.get(url.clone()), &url).await?;
        resp.json()
            .await
            .map_err(|source| ClientError::Http {
                url: url.to_string(),
                source,
            })
    }

    async fn delete_all_snapshots(&self) -> Result<(), ClientError> {
        let url = self.endpoint(&["snapshots"])?;
        self.send(self.http.delete(url.clone()), &url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_queue_names() {
        let client =
            HttpAggregatorClient::new("http://aggregator:9216/", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["queues", "fabric:/node 1"]).unwrap();
        assert_eq!(url.as_str(), "http://aggregator:9216/queues/fabric:%2Fnode%201");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client =
            HttpAggregatorClient::new("http://lb.local/agg", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["snapshots"]).unwrap();
        assert_eq!(url.as_str(), "http://lb.local/agg/snapshots");
    }

    #[test]
    fn test_rejects_bad_urls_and_queue_names() {
        assert!(matches!(
            HttpAggregatorClient::new("not a url", Duration::from_secs(1)),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("a\nb").is_err());
        assert!(validate_queue_name("node-0").is_ok());
    }
}
