//! Reasongrid library crate
//!
//! This library streams a model's reasoning about an academic paper, repairs
//! the truncated JSON as it arrives and lays the reasoning forest out on a grid
//! for terminal and web rendering.

pub mod api;
pub mod cli;
pub mod grid;
pub mod layout;
pub mod models;
pub mod partial;
pub mod provider;
pub mod redact;
pub mod render;
pub mod stream;
pub mod worker;

// Re-export the main types for convenience
pub use grid::{Cell, Connector, Grid, NodeCell};
pub use layout::layout;
pub use models::{Analysis, AnalysisError, AnalysisId, AnalysisStatus, Core, ModelResponse, Task, ToolUse};
pub use partial::decode_partial;
pub use redact::redact_response;
