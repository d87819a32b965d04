//! Reference MLP networks.
//!
//! ```text
//! obs ─► [Linear ─► tanh] × hidden ─► mean head
//!                                     log_std (state-independent, learned)
//! ```

use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::tanh;

use super::{GaussianOutput, GaussianPolicy, ValueFunction};
use crate::algorithms::gaussian::{LOG_STD_MAX, LOG_STD_MIN};

/// Configuration for [`MlpPolicy`].
#[derive(Debug, Clone)]
pub struct MlpPolicyConfig {
    pub obs_size: usize,
    pub action_dim: usize,
    pub hidden: Vec<usize>,
    /// Starting value of every log-std entry
    pub init_log_std: f32,
}

impl MlpPolicyConfig {
    pub fn new(obs_size: usize, action_dim: usize) -> Self {
        Self {
            obs_size,
            action_dim,
            hidden: vec![64, 64],
            init_log_std: -0.5,
        }
    }

    pub fn with_hidden(mut self, hidden: Vec<usize>) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_init_log_std(mut self, log_std: f32) -> Self {
        self.init_log_std = log_std;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MlpPolicy<B> {
        let (layers, width) = hidden_stack(self.obs_size, &self.hidden, device);
        MlpPolicy {
            layers,
            mean_head: LinearConfig::new(width, self.action_dim).init(device),
            log_std: Param::from_tensor(Tensor::full([self.action_dim], self.init_log_std, device)),
        }
    }
}

/// Gaussian policy with a learned, state-independent log-std.
#[derive(Module, Debug)]
pub struct MlpPolicy<B: Backend> {
    layers: Vec<Linear<B>>,
    mean_head: Linear<B>,
    log_std: Param<Tensor<B, 1>>,
}

impl<B: Backend> GaussianPolicy<B> for MlpPolicy<B> {
    fn forward(&self, obs: Tensor<B, 2>) -> GaussianOutput<B> {
        let batch = obs.dims()[0];
        let action_dim = self.action_dim();

        let hidden = run_stack(&self.layers, obs);
        let mean = self.mean_head.forward(hidden);
        let log_std = self
            .log_std
            .val()
            .clamp(LOG_STD_MIN, LOG_STD_MAX)
            .reshape([1, action_dim])
            .repeat_dim(0, batch);

        GaussianOutput { mean, log_std }
    }

    fn obs_size(&self) -> usize {
        input_width(&self.layers, &self.mean_head)
    }

    fn action_dim(&self) -> usize {
        self.mean_head.weight.val().dims()[1]
    }
}

/// Configuration for [`MlpValue`].
#[derive(Debug, Clone)]
pub struct MlpValueConfig {
    pub obs_size: usize,
    pub hidden: Vec<usize>,
}

impl MlpValueConfig {
    pub fn new(obs_size: usize) -> Self {
        Self {
            obs_size,
            hidden: vec![64, 64],
        }
    }

    pub fn with_hidden(mut self, hidden: Vec<usize>) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MlpValue<B> {
        let (layers, width) = hidden_stack(self.obs_size, &self.hidden, device);
        MlpValue {
            layers,
            head: LinearConfig::new(width, 1).init(device),
        }
    }
}

/// Scalar state-value network.
#[derive(Module, Debug)]
pub struct MlpValue<B: Backend> {
    layers: Vec<Linear<B>>,
    head: Linear<B>,
}

impl<B: Backend> ValueFunction<B> for MlpValue<B> {
    fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(run_stack(&self.layers, obs))
    }

    fn obs_size(&self) -> usize {
        input_width(&self.layers, &self.head)
    }
}

fn hidden_stack<B: Backend>(
    input: usize,
    hidden: &[usize],
    device: &B::Device,
) -> (Vec<Linear<B>>, usize) {
    let mut width = input;
    let layers = hidden
        .iter()
        .map(|&out| {
            let layer = LinearConfig::new(width, out).init(device);
            width = out;
            layer
        })
        .collect();
    (layers, width)
}

fn run_stack<B: Backend>(layers: &[Linear<B>], input: Tensor<B, 2>) -> Tensor<B, 2> {
    layers
        .iter()
        .fold(input, |x, layer| tanh(layer.forward(x)))
}

// Linear weights are stored [d_input, d_output].
fn input_width<B: Backend>(layers: &[Linear<B>], head: &Linear<B>) -> usize {
    layers
        .first()
        .unwrap_or(head)
        .weight
        .val()
        .dims()[0]
}
