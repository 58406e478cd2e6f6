//! On-policy rollout collection.
//!
//! Drives N environments for T lock-step steps per iteration, recording
//! transitions into the rollout buffer and embeddings into the per-env
//! state-pair windows. All inference here runs on the non-autodiff inner
//! backend; nothing collected carries a gradient.

use burn::tensor::activation::tanh;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::time::Instant;

use super::RunContext;
use crate::agent::{Agent, EMBED_DIM};
use crate::buffers::{RolloutBuffer, StatePairBuffer};
use crate::environment::{VectorizedGameEnv, FRAME_SIZE, FRAME_STACK, OBS_DIM};

/// Per-environment episode accumulators.
struct EpisodeState {
    extrinsic_return: f32,
    length: usize,
    intrinsic_sum: f32,
    started: Instant,
}

impl EpisodeState {
    fn new() -> Self {
        Self {
            extrinsic_return: 0.0,
            length: 0,
            intrinsic_sum: 0.0,
            started: Instant::now(),
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Rollout collector with run-long carry-over state.
///
/// The latest observations, the latest done flags, and the state-pair
/// buffers all persist across iteration boundaries; only the rollout buffer
/// is recycled per iteration. Pair buffers also persist across episode
/// boundaries, so step gaps may span a reset.
pub struct Collector {
    n_envs: usize,
    /// Latest observations [n_envs * OBS_DIM].
    obs: Vec<f32>,
    /// Post-step observation scratch, swapped with `obs` every step.
    scratch_obs: Vec<f32>,
    /// Done flags recorded after the most recent step.
    next_dones: Vec<bool>,
    pair_buffers: Vec<StatePairBuffer>,
    episodes: Vec<EpisodeState>,
}

impl Collector {
    /// Create a collector for `n_envs` environments; each pair buffer holds
    /// one rollout horizon of embeddings.
    pub fn new(n_envs: usize, horizon: usize) -> Self {
        Self {
            n_envs,
            obs: vec![0.0; n_envs * OBS_DIM],
            scratch_obs: vec![0.0; n_envs * OBS_DIM],
            next_dones: vec![false; n_envs],
            pair_buffers: (0..n_envs)
                .map(|_| StatePairBuffer::new(horizon, EMBED_DIM))
                .collect(),
            episodes: (0..n_envs).map(|_| EpisodeState::new()).collect(),
        }
    }

    /// Reset the environments and capture their initial observations.
    pub fn attach<E: VectorizedGameEnv>(&mut self, env: &mut E, seed: u64) {
        assert_eq!(env.n_envs(), self.n_envs);
        env.reset(seed);
        env.write_observations(&mut self.obs);
        self.next_dones.fill(false);
        for episode in &mut self.episodes {
            episode.reset();
        }
    }

    /// State-pair buffers, one per environment, for the update phase.
    pub fn pair_buffers(&self) -> &[StatePairBuffer] {
        &self.pair_buffers
    }

    /// Done flags following the most recently collected step.
    pub fn latest_dones(&self) -> &[bool] {
        &self.next_dones
    }

    fn obs_tensor<B: Backend>(&self, data: &[f32], device: &B::Device) -> Tensor<B, 4> {
        Tensor::<B, 1>::from_floats(data, device).reshape([
            self.n_envs,
            FRAME_STACK,
            FRAME_SIZE,
            FRAME_SIZE,
        ])
    }

    /// Collect exactly `rollout.horizon()` synchronized steps.
    pub fn collect<B: Backend, E: VectorizedGameEnv>(
        &mut self,
        agent: &Agent<B>,
        env: &mut E,
        rollout: &mut RolloutBuffer,
        uncertainty_coef: f32,
        ctx: &mut RunContext,
        device: &B::Device,
    ) {
        debug_assert!(rollout.is_empty());
        let n_envs = self.n_envs;

        for _step in 0..rollout.horizon() {
            ctx.advance(n_envs);

            // One batched forward pass for every environment.
            let output = agent.forward(self.obs_tensor(&self.obs, device));
            let (actions, log_probs) = output.policy.sample();
            let values_data = output.values_flat().into_data();
            let values = values_data.as_slice::<f32>().expect("values").to_vec();
            let embedding = output.embedding;
            let embedding_data_owned = embedding.clone().into_data();
            let embedding_data = embedding_data_owned
                .as_slice::<f32>()
                .expect("embeddings");

            let step_result = env.step(&actions);
            env.write_observations(&mut self.scratch_obs);

            // Intrinsic signal: bounded transform of the predicted step count
            // between the pre-step and post-step embeddings.
            let next_embedding = agent.embed(self.obs_tensor(&self.scratch_obs, device));
            let gap_pred = agent.predict_gap(embedding, next_embedding);
            let intrinsic_data = tanh(gap_pred).into_data();
            let intrinsic = intrinsic_data.as_slice::<f32>().expect("intrinsic");

            let combined: Vec<f32> = step_result
                .rewards
                .iter()
                .zip(intrinsic.iter())
                .map(|(&extrinsic, &bonus)| extrinsic + uncertainty_coef * bonus)
                .collect();

            // Pair buffers track the pre-step embedding unconditionally;
            // episode boundaries do not reset them.
            for env_idx in 0..n_envs {
                let start = env_idx * EMBED_DIM;
                self.pair_buffers[env_idx]
                    .add(embedding_data[start..start + EMBED_DIM].to_vec());
            }

            rollout.push_step(
                &self.obs,
                &self.next_dones,
                &actions,
                &log_probs,
                &values,
                &combined,
                intrinsic,
                embedding_data,
            );

            let dones = step_result.dones();
            for env_idx in 0..n_envs {
                let episode = &mut self.episodes[env_idx];
                episode.extrinsic_return += step_result.rewards[env_idx];
                episode.length += 1;
                episode.intrinsic_sum += intrinsic[env_idx];

                if dones[env_idx] {
                    ctx.emit("train/episodic_return", episode.extrinsic_return);
                    ctx.emit("train/episodic_length", episode.length as f32);
                    ctx.emit(
                        "train/episodic_time",
                        episode.started.elapsed().as_secs_f32(),
                    );
                    ctx.emit(
                        "train/uncertainty_reward",
                        episode.intrinsic_sum / episode.length as f32,
                    );
                    episode.reset();
                }
            }

            std::mem::swap(&mut self.obs, &mut self.scratch_obs);
            self.next_dones = dones;
        }
    }

    /// Critic values for the observations following the final collected step.
    pub fn bootstrap_values<B: Backend>(
        &self,
        agent: &Agent<B>,
        device: &B::Device,
    ) -> Vec<f32> {
        let values = agent.value(self.obs_tensor(&self.obs, device));
        let flat: Tensor<B, 1> = values.flatten(0, 1);
        flat.into_data().as_slice::<f32>().expect("values").to_vec()
    }
}
