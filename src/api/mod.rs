//! API module
//!
//! This module provides the HTTP surface of reasongrid: the server and a client for it.

pub mod client;
pub mod server;

// Re-export commonly used types
pub use client::{Client, ClientConfig, ClientError};
pub use server::{serve, ServerConfig};
