//! Frozen-policy evaluation.
//!
//! The evaluator depends only on the [`PolicyModel`] capability interface, so
//! it can score the trained agent or any future variant restored from a
//! snapshot. Training and evaluation never share mutable state.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::time::{Duration, Instant};

use crate::agent::PolicyModel;
use crate::environment::{VectorizedGameEnv, FRAME_SIZE, FRAME_STACK, OBS_DIM};

/// How the evaluator turns a distribution into an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSelection {
    /// Argmax of the action distribution.
    Greedy,
    /// Sample from the action distribution.
    Sample,
}

/// Evaluation settings.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Number of completed episodes to report.
    pub eval_episodes: usize,
    pub selection: ActionSelection,
    /// Seed for the environment reset and the sampler.
    pub seed: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eval_episodes: 100,
            selection: ActionSelection::Sample,
            seed: 0,
        }
    }
}

/// One finished evaluation episode.
#[derive(Debug, Clone)]
pub struct EpisodeReport {
    /// Extrinsic return.
    pub episode_return: f32,
    /// Steps in the episode.
    pub length: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Run episodes until `eval_episodes` have completed and report each one.
///
/// Episodes finish in environment order as the vectorized instances run in
/// lock-step; surplus in-progress episodes are discarded.
pub fn run_episodes<B, M, E>(
    model: &M,
    env: &mut E,
    config: &EvalConfig,
    device: &B::Device,
) -> Vec<EpisodeReport>
where
    B: Backend,
    M: PolicyModel<B>,
    E: VectorizedGameEnv,
{
    let n_envs = env.n_envs();
    let n_actions = env
        .action_space()
        .n_discrete()
        .expect("evaluation requires a discrete action space");
    assert_eq!(
        n_actions,
        model.n_actions(),
        "environment and policy disagree on the action count"
    );

    fastrand::seed(config.seed);
    env.reset(config.seed);

    let mut obs_buffer = vec![0.0f32; n_envs * OBS_DIM];
    let mut episode_returns = vec![0.0f32; n_envs];
    let mut episode_lengths = vec![0usize; n_envs];
    let mut episode_starts = vec![Instant::now(); n_envs];
    let mut reports = Vec::with_capacity(config.eval_episodes);

    while reports.len() < config.eval_episodes {
        env.write_observations(&mut obs_buffer);
        let obs = Tensor::<B, 1>::from_floats(obs_buffer.as_slice(), device).reshape([
            n_envs,
            FRAME_STACK,
            FRAME_SIZE,
            FRAME_SIZE,
        ]);

        let output = model.evaluate(obs);
        let actions = match config.selection {
            ActionSelection::Greedy => output.policy.greedy(),
            ActionSelection::Sample => output.policy.sample().0,
        };

        let step = env.step(&actions);
        let dones = step.dones();

        for env_idx in 0..n_envs {
            episode_returns[env_idx] += step.rewards[env_idx];
            episode_lengths[env_idx] += 1;

            if dones[env_idx] {
                if reports.len() < config.eval_episodes {
                    reports.push(EpisodeReport {
                        episode_return: episode_returns[env_idx],
                        length: episode_lengths[env_idx],
                        duration: episode_starts[env_idx].elapsed(),
                    });
                }
                episode_returns[env_idx] = 0.0;
                episode_lengths[env_idx] = 0;
                episode_starts[env_idx] = Instant::now();
            }
        }
    }

    reports
}
