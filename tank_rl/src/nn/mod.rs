//! Network contracts used by the learner and the actors.
//!
//! The pipeline never depends on a concrete architecture. It needs a
//! Gaussian policy head and a scalar value head:
//!
//! | Trait | Input | Output |
//! |-------|-------|--------|
//! | [`GaussianPolicy`] | `[batch, obs_size]` | mean and log-std, `[batch, action_dim]` |
//! | [`ValueFunction`] | `[batch, obs_size]` | `[batch, 1]` |
//!
//! [`mlp`] ships reference implementations of both.

pub mod grad_clip;
pub mod mlp;

pub use grad_clip::{clip_global_norm, global_grad_norm};
pub use mlp::{MlpPolicy, MlpPolicyConfig, MlpValue, MlpValueConfig};

use burn::module::Module;
use burn::prelude::*;

/// Diagonal Gaussian parameters for a batch of observations.
#[derive(Debug, Clone)]
pub struct GaussianOutput<B: Backend> {
    /// `[batch, action_dim]`
    pub mean: Tensor<B, 2>,
    /// `[batch, action_dim]`, already clamped to a sane range
    pub log_std: Tensor<B, 2>,
}

/// Policy network producing a diagonal Gaussian over continuous actions.
pub trait GaussianPolicy<B: Backend>: Module<B> {
    fn forward(&self, obs: Tensor<B, 2>) -> GaussianOutput<B>;

    fn obs_size(&self) -> usize;

    fn action_dim(&self) -> usize;
}

/// State-value network.
pub trait ValueFunction<B: Backend>: Module<B> {
    /// `[batch, obs_size]` to `[batch, 1]`
    fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 2>;

    fn obs_size(&self) -> usize;
}

/// Build a `[rows, cols]` tensor from row-major data.
pub fn rows_tensor<B: Backend>(
    data: &[f32],
    rows: usize,
    cols: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::<B, 1>::from_floats(data, device).reshape([rows, cols])
}

/// Copy a tensor's elements out in row-major order.
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
