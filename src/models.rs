//! Core models for the reasongrid library
//!
//! This module contains the reasoning task tree decoded from the model's output,
//! the analysis records kept while a paper is processed, and the shared `Core`
//! handle the server and worker use to read and update them.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A tool invocation recorded on a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    #[serde(
        default,
        alias = "tool_name",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub parameters: Option<Value>,
    #[serde(
        default,
        alias = "tool_result",
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_result: Option<Value>,
}

impl ToolUse {
    /// Returns true once the tool call has produced a (truthy) result
    pub fn has_result(&self) -> bool {
        self.tool_result.as_ref().is_some_and(is_truthy)
    }
}

/// Represents a node in the model's reasoning forest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub thought: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    #[serde(
        default,
        alias = "tooluse",
        alias = "tool_use",
        deserialize_with = "lenient_object",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_use: Option<ToolUse>,
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub subtasks: Vec<Task>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub conclusion: Option<String>,
}

impl Task {
    /// Creates a task with the given thought and nothing else
    pub fn new(thought: impl Into<String>) -> Self {
        Self {
            thought: Some(thought.into()),
            ..Self::default()
        }
    }

    /// Sets the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the conclusion
    pub fn with_conclusion(mut self, conclusion: impl Into<String>) -> Self {
        self.conclusion = Some(conclusion.into());
        self
    }

    /// Sets the tool invocation
    pub fn with_tool_use(mut self, tool_use: ToolUse) -> Self {
        self.tool_use = Some(tool_use);
        self
    }

    /// Adds a subtask to this task
    pub fn with_subtask(mut self, subtask: Task) -> Self {
        self.subtasks.push(subtask);
        self
    }

    /// The short label shown for this task; falls back to the thought
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.thought.as_deref())
            .unwrap_or("")
    }

    /// A task is complete once it has a conclusion or a tool result
    pub fn is_complete(&self) -> bool {
        self.conclusion.as_deref().is_some_and(|c| !c.is_empty())
            || self.tool_use.as_ref().is_some_and(ToolUse::has_result)
    }
}

/// The full shape the model streams: a reasoning forest and a final answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default, deserialize_with = "lenient_list")]
    pub reasoning: Vec<Task>,
    #[serde(default, deserialize_with = "lenient_text_or_empty")]
    pub answer: String,
}

impl ModelResponse {
    /// Builds a response from a decoded (possibly partial) JSON value.
    ///
    /// Returns `None` when the value is not an object at all.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// JavaScript-style truthiness, the semantics the model's producers use for
/// "has a result"
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// --- Lenient field decoding --- //

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn lenient_text_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok((!value.is_null()).then_some(value))
}

fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}

// --- Analysis records --- //

/// Identifier of an analysis record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnalysisId(u32);

impl AnalysisId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the inner value of the id.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an analysis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The redacted projection written after every streaming tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    /// Redacted tree, absent until the buffer first decodes
    pub content: Option<ModelResponse>,
    pub iteration_count: u64,
    pub is_streaming: bool,
    pub raw_chars: usize,
}

/// The final outcome of a completed analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub response: Option<ModelResponse>,
    pub raw: String,
}

/// A paper analysis tracked by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: AnalysisId,
    pub paper_url: String,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tokens_read: Option<u64>,
    pub snapshot: Option<StreamSnapshot>,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
}

impl Analysis {
    fn new(id: AnalysisId, paper_url: String) -> Self {
        Self {
            id,
            paper_url,
            status: AnalysisStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            tokens_read: None,
            snapshot: None,
            result: None,
            error: None,
        }
    }

    /// The most complete reasoning forest known for this analysis: the final
    /// result once completed, otherwise the latest streaming snapshot
    pub fn latest_reasoning(&self) -> Option<&[Task]> {
        self.result
            .as_ref()
            .and_then(|r| r.response.as_ref())
            .or_else(|| self.snapshot.as_ref().and_then(|s| s.content.as_ref()))
            .map(|r| r.reasoning.as_slice())
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Errors raised by the analysis store
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis '{0}' not found")]
    NotFound(AnalysisId),

    #[error("paperUrl is required")]
    MissingPaperUrl,

    #[error("Internal error: {0}")]
    Internal(String),
}

const MAX_ANALYSIS_ID: u32 = u16::MAX as u32;
// random draws before falling back to a scan
const ID_DRAWS: usize = 32;

/// In-memory record store
struct Store {
    analyses: HashMap<AnalysisId, Analysis>,
    // creation order, oldest first
    order: Vec<AnalysisId>,
    rng: StdRng,
}

impl Store {
    fn new() -> Self {
        Self {
            analyses: HashMap::new(),
            order: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    fn next_id(&mut self) -> Result<AnalysisId, AnalysisError> {
        for _ in 0..ID_DRAWS {
            let candidate = AnalysisId(self.rng.gen_range(1..=MAX_ANALYSIS_ID));
            if !self.analyses.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        // crowded id space: take the lowest free id
        (1..=MAX_ANALYSIS_ID)
            .map(AnalysisId)
            .find(|id| !self.analyses.contains_key(id))
            .ok_or_else(|| AnalysisError::Internal("no analysis ids left".to_string()))
    }

    fn get_mut(&mut self, id: AnalysisId) -> Result<&mut Analysis, AnalysisError> {
        self.analyses
            .get_mut(&id)
            .ok_or(AnalysisError::NotFound(id))
    }
}

/// Shared handle over the analysis store.
///
/// Every mutation notifies subscribers with the id of the record that changed.
#[derive(Clone)]
pub struct Core {
    inner: Arc<Mutex<Store>>,
    update_tx: Arc<tokio::sync::broadcast::Sender<AnalysisId>>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    pub fn new() -> Self {
        // Create a broadcast channel with capacity for 100 messages
        let (tx, _rx) = tokio::sync::broadcast::channel(100);

        Self {
            inner: Arc::new(Mutex::new(Store::new())),
            update_tx: Arc::new(tx),
        }
    }

    fn with_store<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Store) -> R,
    {
        let mut store = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut store)
    }

    // Applies a mutation to one record and notifies observers on success
    fn update<F>(&self, id: AnalysisId, f: F) -> Result<(), AnalysisError>
    where
        F: FnOnce(&mut Analysis),
    {
        self.with_store(|store| -> Result<(), AnalysisError> {
            let analysis = store.get_mut(id)?;
            f(analysis);
            analysis.touch();
            Ok(())
        })?;
        let _ = self.update_tx.send(id);
        Ok(())
    }

    /// Creates a new pending analysis for the given paper URL
    pub fn create_analysis(&self, paper_url: String) -> Result<AnalysisId, AnalysisError> {
        if paper_url.trim().is_empty() {
            return Err(AnalysisError::MissingPaperUrl);
        }
        let id = self.with_store(|store| -> Result<AnalysisId, AnalysisError> {
            let id = store.next_id()?;
            store.analyses.insert(id, Analysis::new(id, paper_url));
            store.order.push(id);
            Ok(id)
        })?;
        tracing::info!(%id, "created analysis");
        let _ = self.update_tx.send(id);
        Ok(id)
    }

    pub fn get_analysis(&self, id: AnalysisId) -> Result<Analysis, AnalysisError> {
        self.with_store(|store| {
            store
                .analyses
                .get(&id)
                .cloned()
                .ok_or(AnalysisError::NotFound(id))
        })
    }

    /// Lists every analysis, newest first
    pub fn list_analyses(&self) -> Vec<Analysis> {
        self.with_store(|store| {
            store
                .order
                .iter()
                .rev()
                .filter_map(|id| store.analyses.get(id).cloned())
                .collect()
        })
    }

    pub fn set_status(&self, id: AnalysisId, status: AnalysisStatus) -> Result<(), AnalysisError> {
        self.update(id, |analysis| analysis.status = status)
    }

    /// Records one streaming tick.
    ///
    /// A snapshot without content never replaces an earlier one that had
    /// content; only the counters move forward.
    pub fn record_progress(
        &self,
        id: AnalysisId,
        snapshot: StreamSnapshot,
        tokens_read: u64,
    ) -> Result<(), AnalysisError> {
        self.update(id, |analysis| {
            analysis.status = AnalysisStatus::Processing;
            analysis.tokens_read = Some(tokens_read);
            match (&mut analysis.snapshot, snapshot.content.is_some()) {
                (Some(previous), false) => {
                    previous.iteration_count = snapshot.iteration_count;
                    previous.raw_chars = snapshot.raw_chars;
                    previous.is_streaming = snapshot.is_streaming;
                }
                _ => analysis.snapshot = Some(snapshot),
            }
        })
    }

    /// Stores the final result and marks the analysis completed
    pub fn complete(
        &self,
        id: AnalysisId,
        result: AnalysisResult,
        tokens_read: u64,
    ) -> Result<(), AnalysisError> {
        self.update(id, |analysis| {
            analysis.status = AnalysisStatus::Completed;
            analysis.tokens_read = Some(tokens_read);
            if let Some(snapshot) = analysis.snapshot.as_mut() {
                snapshot.is_streaming = false;
            }
            analysis.result = Some(result);
        })
    }

    /// Marks the analysis failed with the given message
    pub fn fail(&self, id: AnalysisId, message: String) -> Result<(), AnalysisError> {
        self.update(id, |analysis| {
            analysis.status = AnalysisStatus::Failed;
            if let Some(snapshot) = analysis.snapshot.as_mut() {
                snapshot.is_streaming = false;
            }
            analysis.error = Some(message);
        })
    }

    // Subscribe to state updates
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AnalysisId> {
        self.update_tx.subscribe()
    }
}
