//! Actor-critic agent with a temporal-distance uncertainty head.
//!
//! One convolutional encoder is shared by three consumers: the categorical
//! policy head, the value head, and the uncertainty head that regresses the
//! number of environment steps separating two embeddings.
//!
//! Batch contracts at the network boundaries:
//! - encoder: `[batch, 4, 84, 84]` -> `[batch, EMBED_DIM]`
//! - policy/value heads: `[batch, EMBED_DIM]` -> `[batch, n_actions]` / `[batch, 1]`
//! - uncertainty head: two `[n, EMBED_DIM]` matrices -> `[n, 1]`, non-negative

use burn::module::Module;
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::environment::{FRAME_SIZE, FRAME_STACK};
use crate::nn::{
    OrthogonalConv2d, OrthogonalConv2dConfig, OrthogonalLinear, OrthogonalLinearConfig,
};

/// Width of the shared feature embedding.
pub const EMBED_DIM: usize = 512;
/// Width of a concatenated (earlier, later) embedding pair.
pub const PAIR_DIM: usize = 2 * EMBED_DIM;

/// Flattened size of the final conv stage for 84x84 inputs:
/// 84 -> 20 (8x8 stride 4) -> 9 (4x4 stride 2) -> 7 (3x3 stride 1).
const CONV_FLAT: usize = 64 * 7 * 7;

/// Gain for ReLU hidden layers.
const HIDDEN_GAIN: f64 = std::f64::consts::SQRT_2;
/// Gain for the action head; keeps the initial policy near uniform.
const POLICY_GAIN: f64 = 0.01;
/// Gain for the value head.
const VALUE_GAIN: f64 = 1.0;

/// Categorical policy output (logits over discrete actions).
#[derive(Clone)]
pub struct CategoricalOutput<B: Backend> {
    /// Unnormalized log probabilities [batch, n_actions].
    pub logits: Tensor<B, 2>,
}

impl<B: Backend> CategoricalOutput<B> {
    pub fn new(logits: Tensor<B, 2>) -> Self {
        Self { logits }
    }

    /// Softmax probabilities [batch, n_actions].
    pub fn probs(&self) -> Tensor<B, 2> {
        softmax(self.logits.clone(), 1)
    }

    pub fn batch_size(&self) -> usize {
        self.logits.dims()[0]
    }

    pub fn n_actions(&self) -> usize {
        self.logits.dims()[1]
    }

    /// Sample one action per batch row; returns `(actions, log_probs)`.
    ///
    /// Sampling is detached (plain f32); gradient-carrying log-probs come
    /// from [`Self::log_prob`].
    pub fn sample(&self) -> (Vec<u32>, Vec<f32>) {
        let probs = self.probs();
        let probs_data = probs.into_data();
        let probs_slice: &[f32] = probs_data.as_slice().expect("probs must be f32");

        let batch_size = self.batch_size();
        let n_actions = self.n_actions();
        let mut actions = Vec::with_capacity(batch_size);
        let mut log_probs = Vec::with_capacity(batch_size);

        for row in 0..batch_size {
            let rand_val = fastrand::f32();
            let mut cumsum = 0.0f32;
            let mut selected = (n_actions - 1) as u32;
            for a in 0..n_actions {
                cumsum += probs_slice[row * n_actions + a];
                // The last-action clause absorbs float error when the row
                // does not sum to exactly 1.0.
                if rand_val < cumsum || a == n_actions - 1 {
                    selected = a as u32;
                    break;
                }
            }
            let p = probs_slice[row * n_actions + selected as usize];
            actions.push(selected);
            log_probs.push((p + 1e-8).ln());
        }

        (actions, log_probs)
    }

    /// Most probable action per batch row.
    pub fn greedy(&self) -> Vec<u32> {
        let probs = self.probs();
        let probs_data = probs.into_data();
        let probs_slice: &[f32] = probs_data.as_slice().expect("probs must be f32");

        let n_actions = self.n_actions();
        (0..self.batch_size())
            .map(|row| {
                let mut best = 0usize;
                for a in 1..n_actions {
                    if probs_slice[row * n_actions + a] > probs_slice[row * n_actions + best] {
                        best = a;
                    }
                }
                best as u32
            })
            .collect()
    }

    /// Log probabilities of the given actions, with gradient flow.
    pub fn log_prob(&self, actions: &[u32], device: &B::Device) -> Tensor<B, 1> {
        let batch_size = actions.len();
        debug_assert_eq!(batch_size, self.batch_size());

        let indices: Vec<i32> = actions.iter().map(|&a| a as i32).collect();
        let indices_tensor: Tensor<B, 1, Int> = Tensor::from_ints(indices.as_slice(), device);
        let indices_2d: Tensor<B, 2, Int> = indices_tensor.reshape([batch_size, 1]);

        let selected = self.probs().gather(1, indices_2d);
        let selected_1d: Tensor<B, 1> = selected.flatten(0, 1);
        (selected_1d + 1e-8).log()
    }

    /// Per-row entropy, with gradient flow.
    pub fn entropy(&self) -> Tensor<B, 1> {
        let probs = self.probs();
        let log_probs = (probs.clone() + 1e-8).log();
        let neg_entropy: Tensor<B, 2> = (probs * log_probs).sum_dim(1);
        -neg_entropy.flatten(0, 1)
    }
}

/// Output of one batched agent forward pass.
#[derive(Clone)]
pub struct AgentOutput<B: Backend> {
    /// Action distribution.
    pub policy: CategoricalOutput<B>,
    /// Value estimates [batch, 1].
    pub values: Tensor<B, 2>,
    /// Shared feature embedding [batch, EMBED_DIM].
    pub embedding: Tensor<B, 2>,
}

impl<B: Backend> AgentOutput<B> {
    /// Value estimates as a 1D tensor [batch].
    pub fn values_flat(&self) -> Tensor<B, 1> {
        self.values.clone().flatten(0, 1)
    }
}

/// Capability interface for anything that can act from observations.
///
/// The evaluator depends only on this trait, so a future agent variant only
/// needs to produce an action distribution, value, and embedding per
/// observation to be evaluable.
pub trait PolicyModel<B: Backend> {
    /// Number of discrete actions.
    fn n_actions(&self) -> usize;

    /// One batched forward pass over `[batch, 4, 84, 84]` observations.
    fn evaluate(&self, obs: Tensor<B, 4>) -> AgentOutput<B>;
}

/// Shared-encoder actor-critic with an uncertainty head.
#[derive(Module, Debug)]
pub struct Agent<B: Backend> {
    conv1: OrthogonalConv2d<B>,
    conv2: OrthogonalConv2d<B>,
    conv3: OrthogonalConv2d<B>,
    trunk: OrthogonalLinear<B>,
    actor_head: OrthogonalLinear<B>,
    critic_head: OrthogonalLinear<B>,
    gap_fc1: OrthogonalLinear<B>,
    gap_fc2: OrthogonalLinear<B>,
    gap_out: OrthogonalLinear<B>,
    n_actions: usize,
}

impl<B: Backend> Agent<B> {
    /// Create a freshly initialized agent.
    ///
    /// Seed the backend RNG (`B::seed`) beforehand for reproducible weights.
    pub fn new(n_actions: usize, device: &B::Device) -> Self {
        assert!(n_actions > 0, "agent needs a non-empty discrete action set");

        Self {
            conv1: OrthogonalConv2dConfig::new(FRAME_STACK, 32, 8)
                .with_stride(4)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            conv2: OrthogonalConv2dConfig::new(32, 64, 4)
                .with_stride(2)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            conv3: OrthogonalConv2dConfig::new(64, 64, 3)
                .with_stride(1)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            trunk: OrthogonalLinearConfig::new(CONV_FLAT, EMBED_DIM)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            actor_head: OrthogonalLinearConfig::new(EMBED_DIM, n_actions)
                .with_gain(POLICY_GAIN)
                .init(device),
            critic_head: OrthogonalLinearConfig::new(EMBED_DIM, 1)
                .with_gain(VALUE_GAIN)
                .init(device),
            gap_fc1: OrthogonalLinearConfig::new(PAIR_DIM, 256)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            gap_fc2: OrthogonalLinearConfig::new(256, 128)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            gap_out: OrthogonalLinearConfig::new(128, 1)
                .with_gain(HIDDEN_GAIN)
                .init(device),
            n_actions,
        }
    }

    /// Encode observations `[batch, 4, 84, 84]` into `[batch, EMBED_DIM]`.
    ///
    /// Pixel values are byte-scaled here, so callers pass raw 0..=255 frames.
    pub fn embed(&self, obs: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, stack, height, width] = obs.dims();
        debug_assert_eq!(stack, FRAME_STACK);
        debug_assert_eq!(height, FRAME_SIZE);
        debug_assert_eq!(width, FRAME_SIZE);

        let x = obs.div_scalar(255.0);
        let x = relu(self.conv1.forward(x));
        let x = relu(self.conv2.forward(x));
        let x = relu(self.conv3.forward(x));
        let flat: Tensor<B, 2> = x.reshape([batch, CONV_FLAT]);
        relu(self.trunk.forward(flat))
    }

    /// Full forward pass: policy logits, value, and embedding.
    pub fn forward(&self, obs: Tensor<B, 4>) -> AgentOutput<B> {
        let embedding = self.embed(obs);
        let logits = self.actor_head.forward(embedding.clone());
        let values = self.critic_head.forward(embedding.clone());
        AgentOutput {
            policy: CategoricalOutput::new(logits),
            values,
            embedding,
        }
    }

    /// Value estimates only, for bootstrapping at the rollout horizon.
    pub fn value(&self, obs: Tensor<B, 4>) -> Tensor<B, 2> {
        self.critic_head.forward(self.embed(obs))
    }

    /// Predict the step count separating `earlier` from `later` embeddings.
    ///
    /// Both inputs are `[n, EMBED_DIM]`; the output is `[n, 1]` and
    /// non-negative (final ReLU).
    pub fn predict_gap(&self, earlier: Tensor<B, 2>, later: Tensor<B, 2>) -> Tensor<B, 2> {
        debug_assert_eq!(earlier.dims()[1], EMBED_DIM);
        debug_assert_eq!(later.dims()[1], EMBED_DIM);

        let pair = Tensor::cat(vec![earlier, later], 1);
        let x = relu(self.gap_fc1.forward(pair));
        let x = relu(self.gap_fc2.forward(x));
        relu(self.gap_out.forward(x))
    }
}

impl<B: Backend> PolicyModel<B> for Agent<B> {
    fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn evaluate(&self, obs: Tensor<B, 4>) -> AgentOutput<B> {
        self.forward(obs)
    }
}
