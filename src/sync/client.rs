use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::models::{FocusSession, SyncAccepted, SyncRequest, SESSIONS_PATH};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ingest endpoint rejected the sync token")]
    Unauthorized,
    #[error("batch of {0} sessions is larger than the endpoint accepts")]
    PayloadTooLarge(usize),
    #[error("ingest endpoint rejected the batch ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Delivers one batch to the ingestion endpoint.
#[async_trait]
pub trait IngestClient: Send + Sync {
    async fn submit(&self, sessions: &[FocusSession]) -> Result<SyncAccepted, TransportError>;
}

pub struct HttpIngestClient {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl HttpIngestClient {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            url: format!("{}{}", endpoint.trim_end_matches('/'), SESSIONS_PATH),
            token: token.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn submit(&self, sessions: &[FocusSession]) -> Result<SyncAccepted, TransportError> {
        let body = SyncRequest {
            sessions: sessions.to_vec(),
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(response.json::<SyncAccepted>().await?),
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
            StatusCode::PAYLOAD_TOO_LARGE => Err(TransportError::PayloadTooLarge(sessions.len())),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(TransportError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}
