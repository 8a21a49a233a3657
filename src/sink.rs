//! Delivery of finalized rankings to the external persistence service.

use crate::protocol::RankingPayload;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Ranking request failed: {0}")]
    Request(String),

    #[error("Ranking service returned status {0}")]
    Status(u16),

    #[error("Ranking request timed out after {0:?}")]
    Timeout(Duration),
}

/// Destination for the one-shot ranking submission of a finalized box
#[async_trait]
pub trait RankingSink: Send + Sync {
    async fn submit(&self, payload: &RankingPayload) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

/// POSTs the payload as JSON
pub struct HttpRankingSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRankingSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl RankingSink for HttpRankingSink {
    async fn submit(&self, payload: &RankingPayload) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(self.timeout)
                } else {
                    SinkError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(SinkError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.url
    }
}
