//! Pipeline runners.
//!
//! - [`AsyncPpoPipeline`]: N rollout actors and 1 learner, connected by a
//!   batch transport and a model store

pub mod pipeline;

#[cfg(test)]
mod tests;

pub use pipeline::{AsyncPpoPipeline, PipelineResources, PipelineSummary};
