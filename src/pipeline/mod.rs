//! Pipeline graph model.
//!
//! A [`PipelineConfig`] is an ordered list of [`AgentConfig`]s plus global
//! bounds, per-edge traversal limits and interrupt resume stages. Configs are
//! validated once and treated as immutable by the runtime.

mod agent_config;
mod pipeline_config;

pub use agent_config::{AgentConfig, JoinStrategy, RoutingRule};
pub use pipeline_config::{EdgeLimit, PipelineConfig, ResumeStages, RunMode};

/// Sentinel routing target that ends a run.
pub const END_STAGE: &str = "end";

/// Key used to count traversals of the `from -> to` transition.
pub fn edge_key(from: &str, to: &str) -> String {
    format!("{}->{}", from, to)
}
