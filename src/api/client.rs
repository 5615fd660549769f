//! API client module
//!
//! This module provides HTTP client functionality to interact with the reasongrid API server.

use std::sync::Arc;

use reqwest::{Client as ReqwestClient, Error as ReqwestError, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::models::{Analysis, AnalysisId};

/// API client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Generic API response structure
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] ReqwestError),

    #[error("API error: {0}")]
    Api(String),

    #[error("Missing data in response")]
    MissingData,
}

/// API client for the reasongrid service
#[derive(Debug, Clone)]
pub struct Client {
    http_client: Arc<ReqwestClient>,
    config: ClientConfig,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a new client with default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            http_client: Arc::new(ReqwestClient::new()),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Submit a paper for analysis
    pub async fn submit(&self, paper_url: &str) -> Result<AnalysisId, ClientError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct AnalyzeRequest<'a> {
            paper_url: &'a str,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Accepted {
            analysis_id: AnalysisId,
        }

        let response = self
            .http_client
            .post(self.url("/analyze"))
            .json(&AnalyzeRequest { paper_url })
            .send()
            .await?;
        let accepted: Accepted = read_envelope(response).await?.ok_or(ClientError::MissingData)?;
        Ok(accepted.analysis_id)
    }

    /// List every analysis, newest first
    pub async fn list(&self) -> Result<Vec<Analysis>, ClientError> {
        let response = self.http_client.get(self.url("/api/analyses")).send().await?;
        read_envelope(response).await?.ok_or(ClientError::MissingData)
    }

    /// Get one analysis record
    pub async fn get(&self, id: AnalysisId) -> Result<Analysis, ClientError> {
        let response = self
            .http_client
            .get(self.url(&format!("/api/analyses/{}", id)))
            .send()
            .await?;
        read_envelope(response).await?.ok_or(ClientError::MissingData)
    }

    /// Get the laid-out grid of an analysis, if it has anything to render
    pub async fn grid(&self, id: AnalysisId) -> Result<Option<Grid>, ClientError> {
        let response = self
            .http_client
            .get(self.url(&format!("/api/analyses/{}/grid", id)))
            .send()
            .await?;
        read_envelope(response).await
    }
}

// Unwraps the response envelope; `Ok(None)` means the server sent no data
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ClientError> {
    let status = response.status();
    let api_response: ApiResponse<T> = match response.json().await {
        Ok(api_response) => api_response,
        Err(_) if !status.is_success() => {
            return Err(ClientError::Api(format!("HTTP error: {}", status)));
        }
        Err(e) => return Err(ClientError::Http(e)),
    };

    if api_response.success {
        Ok(api_response.data)
    } else {
        Err(ClientError::Api(
            api_response
                .error
                .unwrap_or_else(|| "Unknown API error".to_string()),
        ))
    }
}
