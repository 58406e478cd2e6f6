//! Rollout storage for on-policy collection.
//!
//! One buffer holds a full `[T, N]` rollout in step-major flat arrays
//! (`flat_index = step * n_envs + env`). The collector owns it exclusively
//! while filling; the update phase reads it immutably; `clear` recycles the
//! allocations for the next iteration.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::environment::{FRAME_SIZE, FRAME_STACK};

/// Flat `[T, N]` transition storage.
pub struct RolloutBuffer {
    /// Observations [T * N * obs_dim], raw pixel scale.
    pub obs: Vec<f32>,
    /// Sampled action indices [T * N].
    pub actions: Vec<u32>,
    /// Behavior-policy log probabilities [T * N].
    pub log_probs: Vec<f32>,
    /// Combined (extrinsic + weighted intrinsic) rewards [T * N].
    pub rewards: Vec<f32>,
    /// Done-before-step flags [T * N]: `dones[t]` marks that `obs[t]` starts
    /// a fresh episode.
    pub dones: Vec<bool>,
    /// Critic value estimates [T * N].
    pub values: Vec<f32>,
    /// Intrinsic uncertainty rewards [T * N] (before weighting).
    pub intrinsic: Vec<f32>,
    /// Encoder embeddings [T * N * embed_dim].
    pub embeddings: Vec<f32>,

    n_envs: usize,
    obs_dim: usize,
    embed_dim: usize,
    horizon: usize,
    step_count: usize,
}

impl RolloutBuffer {
    pub fn new(n_envs: usize, horizon: usize, obs_dim: usize, embed_dim: usize) -> Self {
        let cells = n_envs * horizon;
        Self {
            obs: Vec::with_capacity(cells * obs_dim),
            actions: Vec::with_capacity(cells),
            log_probs: Vec::with_capacity(cells),
            rewards: Vec::with_capacity(cells),
            dones: Vec::with_capacity(cells),
            values: Vec::with_capacity(cells),
            intrinsic: Vec::with_capacity(cells),
            embeddings: Vec::with_capacity(cells * embed_dim),
            n_envs,
            obs_dim,
            embed_dim,
            horizon,
            step_count: 0,
        }
    }

    pub fn n_envs(&self) -> usize {
        self.n_envs
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Total transitions stored so far.
    pub fn len(&self) -> usize {
        self.step_count * self.n_envs
    }

    pub fn is_empty(&self) -> bool {
        self.step_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.step_count >= self.horizon
    }

    /// Append one synchronized step across all environments.
    #[allow(clippy::too_many_arguments)]
    pub fn push_step(
        &mut self,
        obs: &[f32],
        dones_before: &[bool],
        actions: &[u32],
        log_probs: &[f32],
        values: &[f32],
        rewards: &[f32],
        intrinsic: &[f32],
        embeddings: &[f32],
    ) {
        debug_assert!(!self.is_full(), "rollout already holds {} steps", self.horizon);
        debug_assert_eq!(obs.len(), self.n_envs * self.obs_dim);
        debug_assert_eq!(dones_before.len(), self.n_envs);
        debug_assert_eq!(actions.len(), self.n_envs);
        debug_assert_eq!(log_probs.len(), self.n_envs);
        debug_assert_eq!(values.len(), self.n_envs);
        debug_assert_eq!(rewards.len(), self.n_envs);
        debug_assert_eq!(intrinsic.len(), self.n_envs);
        debug_assert_eq!(embeddings.len(), self.n_envs * self.embed_dim);

        self.obs.extend_from_slice(obs);
        self.dones.extend_from_slice(dones_before);
        self.actions.extend_from_slice(actions);
        self.log_probs.extend_from_slice(log_probs);
        self.values.extend_from_slice(values);
        self.rewards.extend_from_slice(rewards);
        self.intrinsic.extend_from_slice(intrinsic);
        self.embeddings.extend_from_slice(embeddings);
        self.step_count += 1;
    }

    /// Drop all transitions, keeping allocations.
    pub fn clear(&mut self) {
        self.obs.clear();
        self.actions.clear();
        self.log_probs.clear();
        self.rewards.clear();
        self.dones.clear();
        self.values.clear();
        self.intrinsic.clear();
        self.embeddings.clear();
        self.step_count = 0;
    }

    /// Extract the minibatch at the given flat indices, pairing stored
    /// transitions with their computed advantages and returns.
    pub fn extract(&self, advantages: &[f32], returns: &[f32], indices: &[usize]) -> Minibatch {
        debug_assert_eq!(advantages.len(), self.len());
        debug_assert_eq!(returns.len(), self.len());

        let batch = indices.len();
        let mut mb = Minibatch {
            obs: Vec::with_capacity(batch * self.obs_dim),
            actions: Vec::with_capacity(batch),
            old_log_probs: Vec::with_capacity(batch),
            old_values: Vec::with_capacity(batch),
            advantages: Vec::with_capacity(batch),
            returns: Vec::with_capacity(batch),
            obs_dim: self.obs_dim,
        };

        for &idx in indices {
            let obs_start = idx * self.obs_dim;
            mb.obs
                .extend_from_slice(&self.obs[obs_start..obs_start + self.obs_dim]);
            mb.actions.push(self.actions[idx]);
            mb.old_log_probs.push(self.log_probs[idx]);
            mb.old_values.push(self.values[idx]);
            mb.advantages.push(advantages[idx]);
            mb.returns.push(returns[idx]);
        }

        mb
    }
}

/// One shuffled minibatch of flattened transitions.
pub struct Minibatch {
    pub obs: Vec<f32>,
    pub actions: Vec<u32>,
    pub old_log_probs: Vec<f32>,
    pub old_values: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
    obs_dim: usize,
}

impl Minibatch {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Observations as `[batch, FRAME_STACK, FRAME_SIZE, FRAME_SIZE]`.
    pub fn obs_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        debug_assert_eq!(self.obs_dim, FRAME_STACK * FRAME_SIZE * FRAME_SIZE);
        Tensor::<B, 1>::from_floats(self.obs.as_slice(), device).reshape([
            self.len(),
            FRAME_STACK,
            FRAME_SIZE,
            FRAME_SIZE,
        ])
    }

    pub fn old_log_probs_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_floats(self.old_log_probs.as_slice(), device)
    }

    pub fn old_values_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_floats(self.old_values.as_slice(), device)
    }

    pub fn returns_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_floats(self.returns.as_slice(), device)
    }
}

/// Shuffle `0..total` and split into equal chunks of `minibatch_size`.
///
/// Config validation guarantees divisibility, so every index appears in
/// exactly one chunk and all chunks have the same size.
pub fn generate_minibatches(
    total: usize,
    minibatch_size: usize,
    rng: &mut StdRng,
) -> Vec<Vec<usize>> {
    debug_assert!(minibatch_size > 0);
    debug_assert_eq!(total % minibatch_size, 0);

    let mut indices: Vec<usize> = (0..total).collect();
    indices.shuffle(rng);

    indices
        .chunks(minibatch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tiny_buffer(n_envs: usize, horizon: usize) -> RolloutBuffer {
        // 2-float "observations" and 3-float embeddings keep the tests light;
        // the buffer itself is dimension-agnostic.
        RolloutBuffer::new(n_envs, horizon, 2, 3)
    }

    fn push_filler(buffer: &mut RolloutBuffer, step: usize) {
        let n = buffer.n_envs();
        let obs: Vec<f32> = (0..n * 2).map(|k| (step * 100 + k) as f32).collect();
        let embeddings: Vec<f32> = (0..n * 3).map(|k| k as f32).collect();
        let actions: Vec<u32> = (0..n as u32).collect();
        buffer.push_step(
            &obs,
            &vec![false; n],
            &actions,
            &vec![-0.1; n],
            &vec![0.5; n],
            &vec![1.0; n],
            &vec![0.2; n],
            &embeddings,
        );
    }

    #[test]
    fn test_push_and_flat_layout() {
        let mut buffer = tiny_buffer(2, 3);
        assert!(buffer.is_empty());

        push_filler(&mut buffer, 0);
        push_filler(&mut buffer, 1);
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.is_full());

        push_filler(&mut buffer, 2);
        assert!(buffer.is_full());

        // Step-major layout: flat index 3 is (step 1, env 1).
        assert_eq!(buffer.obs[3 * 2], 102.0);
        assert_eq!(buffer.actions[3], 1);
    }

    #[test]
    fn test_clear_recycles() {
        let mut buffer = tiny_buffer(2, 2);
        push_filler(&mut buffer, 0);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.obs.len(), 0);
        push_filler(&mut buffer, 0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_extract_minibatch() {
        let mut buffer = tiny_buffer(2, 2);
        push_filler(&mut buffer, 0);
        push_filler(&mut buffer, 1);

        let advantages: Vec<f32> = vec![10.0, 11.0, 12.0, 13.0];
        let returns: Vec<f32> = vec![20.0, 21.0, 22.0, 23.0];
        let mb = buffer.extract(&advantages, &returns, &[3, 0]);

        assert_eq!(mb.len(), 2);
        assert_eq!(mb.advantages, vec![13.0, 10.0]);
        assert_eq!(mb.returns, vec![23.0, 20.0]);
        assert_eq!(mb.actions, vec![1, 0]);
        assert_eq!(mb.obs, vec![102.0, 103.0, 0.0, 1.0]);
    }

    #[test]
    fn test_minibatch_coverage_per_epoch() {
        let total = 64;
        let minibatch_size = 16;
        let mut rng = StdRng::seed_from_u64(3);

        let epoch_a = generate_minibatches(total, minibatch_size, &mut rng);
        assert_eq!(epoch_a.len(), 4);
        for chunk in &epoch_a {
            assert_eq!(chunk.len(), minibatch_size);
        }

        // Every index exactly once.
        let mut seen: Vec<usize> = epoch_a.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..total).collect::<Vec<_>>());

        // Independent reshuffle on the next epoch.
        let epoch_b = generate_minibatches(total, minibatch_size, &mut rng);
        let flat_a: Vec<usize> = epoch_a.into_iter().flatten().collect();
        let flat_b: Vec<usize> = epoch_b.iter().flatten().copied().collect();
        assert_ne!(flat_a, flat_b);

        let mut seen_b = flat_b;
        seen_b.sort_unstable();
        assert_eq!(seen_b, (0..total).collect::<Vec<_>>());
    }
}
