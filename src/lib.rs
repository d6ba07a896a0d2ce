//! # Jeeves Runtime - Multi-Agent Pipeline Engine
//!
//! Executes declarative graphs of LLM, tool and passthrough agents against a
//! single state container:
//! - Envelope state with bounded iterations, LLM calls and agent hops
//! - Pipeline/agent configuration with graph validation
//! - Config-driven agents with hooks, retries and timeouts
//! - Sequential, parallel and streaming scheduling
//! - Per-edge traversal limits
//! - Flow interrupts for human-in-the-loop pause/resume
//!
//! ## Architecture
//!
//! ```text
//!   PipelineConfig ──► RuntimeBuilder ──► Runtime ──► Agent::process
//!                                            │             │
//!                                            ▼             ▼
//!                                        Envelope ◄── LlmProvider / ToolExecutor
//!                                            │
//!                                  Engine (store, checkpoint, transport surface)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod agent;
pub mod engine;
pub mod envelope;
pub mod events;
pub mod persistence;
pub mod pipeline;
pub mod runtime;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use agent::{Agent, AgentCapabilities, AgentHooks, AgentOutcome, StageFailure};
pub use engine::{CreateEnvelopeRequest, Engine};
pub use envelope::{Envelope, FlowInterrupt, InterruptKind, InterruptResponse, TerminalReason};
pub use pipeline::{AgentConfig, JoinStrategy, PipelineConfig, RunMode, END_STAGE};
pub use runtime::{RunOutcome, RunStatus, Runtime, RuntimeBuilder, StreamEvent};
pub use types::{Config, Error, Result};
