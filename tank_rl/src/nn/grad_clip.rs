//! Global L2-norm gradient clipping.
//!
//! Burn's optimizer-level clipping works per parameter tensor. The learner
//! clips each network by the norm of all its gradients together:
//!
//! ```text
//! g_norm = sqrt(Σ_p ||g_p||²)
//! g_p   *= max_norm / g_norm      when g_norm > max_norm
//! ```
//!
//! Both passes walk the module with a [`ModuleMapper`] to reach every
//! parameter id.

use burn::module::{AutodiffModule, ModuleMapper, Param};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

struct NormCollector<'a> {
    grads: &'a GradientsParams,
    sq_sum: f64,
}

impl<'a, B: AutodiffBackend> ModuleMapper<B> for NormCollector<'a> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(param.id.clone()) {
            let sq: f32 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.sq_sum += sq as f64;
        }
        param
    }
}

struct GradScaler<'a> {
    grads: &'a mut GradientsParams,
    scale: f32,
}

impl<'a, B: AutodiffBackend> ModuleMapper<B> for GradScaler<'a> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let id = param.id.clone();
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id.clone()) {
            self.grads.register(id, grad.mul_scalar(self.scale));
        }
        param
    }
}

/// L2 norm over every gradient that belongs to `module`.
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f32
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut collector = NormCollector { grads, sq_sum: 0.0 };
    let _ = module.clone().map(&mut collector);
    collector.sq_sum.sqrt() as f32
}

/// Rescale `grads` so their global norm is at most `max_norm`.
///
/// Returns the gradients and the norm measured before clipping. A
/// non-finite norm leaves the gradients untouched; the health checks catch
/// the corrupted update.
pub fn clip_global_norm<B, M>(
    module: &M,
    mut grads: GradientsParams,
    max_norm: f32,
) -> (GradientsParams, f32)
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = global_grad_norm::<B, M>(module, &grads);
    if norm.is_finite() && norm > max_norm && max_norm > 0.0 {
        let mut scaler = GradScaler {
            grads: &mut grads,
            scale: max_norm / norm,
        };
        let _ = module.clone().map(&mut scaler);
    }
    (grads, norm)
}
