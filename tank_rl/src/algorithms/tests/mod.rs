//! Behavioural tests for the algorithms module.
//!
//! - `gae_tests`: GAE recursion, terminal handling, normalization
//! - `vtrace_tests`: degenerate cases, trace clipping, properties
//! - `advantage_tests`: strategy selection from config
//! - `gaussian_tests`: tensor forms against scalar forms
//! - `policy_loss_tests`: PPO surrogate and clipped value loss

mod gaussian_tests;
mod policy_loss_tests;
