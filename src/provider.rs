//! LLM provider
//!
//! The streaming chat-completions call that produces the reasoning tree. The
//! worker only sees the [`CompletionSource`] trait so it can be driven by canned
//! streams in tests.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};

/// Errors raised while opening or reading the completion stream
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed: {status} {body}")]
    Status { status: u16, body: String },

    #[error("No API key configured")]
    MissingApiKey,
}

/// Raw response body chunks, in arrival order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ProviderError>> + Send>>;

/// Something that can stream a paper analysis
#[async_trait::async_trait]
pub trait CompletionSource: Send + Sync {
    /// Starts an analysis of the paper and returns its body stream
    async fn open(&self, paper_url: &str) -> Result<ChunkStream, ProviderError>;
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Where the model's tools are served
    pub tool_endpoint: String,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.subconscious.dev/v1/chat/completions".to_string(),
            api_key: None,
            model: "tim-large".to_string(),
            tool_endpoint: "http://localhost:8050/call_tool".to_string(),
            temperature: 0.3,
            top_p: 0.95,
        }
    }
}

const TOOL_TIMEOUT_SECS: u64 = 10;

// name, description, parameter properties, required parameters
const TOOLS: &[(&str, &str, &[(&str, &str)], &[&str])] = &[
    (
        "SearchTool",
        "help you find information on the internet.",
        &[("query", "A natural language query for the search engine.")],
        &["query"],
    ),
    (
        "ReaderTool",
        "Read the content of general webpages using url with a goal.",
        &[
            ("url", "The URL of the webpage to read."),
            ("goal", "The goal of reading the webpage."),
        ],
        &["url", "goal"],
    ),
    (
        "ArxivReaderTool",
        "Read an arxiv paper with the paper link on arxiv and find it's main points.",
        &[("arxiv_url", "The URL of the arxiv paper to read.")],
        &["arxiv_url"],
    ),
];

/// Tool definitions sent with every request
pub fn tool_catalogue(endpoint: &str) -> Vec<Value> {
    TOOLS
        .iter()
        .map(|(name, description, properties, required)| {
            let properties: serde_json::Map<String, Value> = properties
                .iter()
                .map(|(param, about)| {
                    (
                        param.to_string(),
                        json!({"type": "string", "description": about}),
                    )
                })
                .collect();
            json!({
                "type": "function",
                "name": name,
                "description": description,
                "url": endpoint,
                "method": "POST",
                "timeout": TOOL_TIMEOUT_SECS,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                },
            })
        })
        .collect()
}

const SYSTEM_PROMPT: &str = "You analyze academic papers. Reason in a tree of tasks and reply with \
a single JSON object {\"reasoning\": [task], \"answer\": string} where each task is \
{\"thought\", \"title\", \"tooluse\": {\"tool_name\", \"parameters\", \"tool_result\"}, \
\"subtasks\": [task], \"conclusion\"}.";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    top_p: f32,
    temperature: f32,
    tools: Vec<Value>,
}

/// Streams completions over HTTP from an OpenAI-style endpoint
#[derive(Debug, Clone)]
pub struct HttpCompletionSource {
    http_client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpCompletionSource {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request_body(&self, paper_url: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Analyze the academic paper at this URL: {}", paper_url),
                },
            ],
            stream: true,
            top_p: self.config.top_p,
            temperature: self.config.temperature,
            tools: tool_catalogue(&self.config.tool_endpoint),
        }
    }
}

#[async_trait::async_trait]
impl CompletionSource for HttpCompletionSource {
    async fn open(&self, paper_url: &str) -> Result<ChunkStream, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ProviderError::MissingApiKey)?;

        tracing::info!(model = %self.config.model, %paper_url, "opening completion stream");
        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&self.request_body(paper_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(ProviderError::from)
        })))
    }
}
