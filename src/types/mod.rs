//! Core types for the Jeeves runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (EnvelopeId, RequestId, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for defaults, logging, and scheduling

mod config;
mod errors;
mod ids;

pub use config::{Config, DefaultLimits, ObservabilityConfig, RuntimeSettings};
pub use errors::{Error, Result};
pub use ids::{EnvelopeId, RequestId, SessionId, UserId};
