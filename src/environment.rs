//! Environment boundary for training and evaluation.
//!
//! The wrapper stack that produces stacked, preprocessed frames (action
//! repeat, life-loss handling, video capture, ...) lives outside this crate.
//! Core code only sees the vectorized interface below: flat observation
//! buffers, lock-step batched stepping, and auto-reset on episode end.

/// Number of stacked frames per observation.
pub const FRAME_STACK: usize = 4;
/// Side length of a preprocessed (square, grayscale) frame.
pub const FRAME_SIZE: usize = 84;
/// Flat length of one environment's observation.
pub const OBS_DIM: usize = FRAME_STACK * FRAME_SIZE * FRAME_SIZE;

/// Action space reported by an environment.
///
/// Training supports discrete spaces only; anything else is a setup-time
/// contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSpace {
    /// N mutually exclusive actions, indexed `0..n`.
    Discrete(usize),
    /// Continuous action vector of the given dimension (unsupported).
    Continuous(usize),
}

impl ActionSpace {
    /// Number of discrete actions, or `None` for continuous spaces.
    pub fn n_discrete(&self) -> Option<usize> {
        match self {
            ActionSpace::Discrete(n) => Some(*n),
            ActionSpace::Continuous(_) => None,
        }
    }
}

/// Result from stepping all environments once.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Extrinsic rewards [n_envs].
    pub rewards: Vec<f32>,
    /// Terminal flags (episode truly ended) [n_envs].
    pub terminals: Vec<bool>,
    /// Truncation flags (time limit) [n_envs].
    pub truncations: Vec<bool>,
}

impl StepResult {
    /// Done flags (terminal OR truncated).
    pub fn dones(&self) -> Vec<bool> {
        self.terminals
            .iter()
            .zip(self.truncations.iter())
            .map(|(&t, &tr)| t || tr)
            .collect()
    }
}

/// Vectorized game environment.
///
/// All N instances are stepped together and may never run ahead of each
/// other. Implementations auto-reset an instance whose episode ended, so the
/// observations written after `step` are the first observations of the new
/// episode for that instance.
pub trait VectorizedGameEnv {
    /// Number of parallel environment instances.
    fn n_envs(&self) -> usize;

    /// Action space shared by every instance.
    fn action_space(&self) -> ActionSpace;

    /// Reset all instances with the given seed.
    fn reset(&mut self, seed: u64);

    /// Write current observations into `buffer`.
    ///
    /// `buffer` must hold `n_envs * OBS_DIM` floats, laid out
    /// `[env0_frames, env1_frames, ...]` with each environment's frames in
    /// `[FRAME_STACK, FRAME_SIZE, FRAME_SIZE]` order.
    fn write_observations(&self, buffer: &mut [f32]);

    /// Step every instance with its action index.
    fn step(&mut self, actions: &[u32]) -> StepResult;
}

#[cfg(test)]
pub(crate) mod synthetic {
    //! Deterministic in-memory environment used by crate tests.

    use super::*;

    /// Scripted environment: observations are a pure function of the step
    /// counter, rewards alternate deterministically, and every episode
    /// truncates after a fixed number of steps.
    pub struct SyntheticEnv {
        n_envs: usize,
        n_actions: usize,
        episode_len: usize,
        step_counters: Vec<usize>,
        frame_counter: usize,
    }

    impl SyntheticEnv {
        pub fn new(n_envs: usize, n_actions: usize, episode_len: usize) -> Self {
            Self {
                n_envs,
                n_actions,
                episode_len,
                step_counters: vec![0; n_envs],
                frame_counter: 0,
            }
        }
    }

    impl VectorizedGameEnv for SyntheticEnv {
        fn n_envs(&self) -> usize {
            self.n_envs
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Discrete(self.n_actions)
        }

        fn reset(&mut self, seed: u64) {
            self.frame_counter = seed as usize % 17;
            for counter in &mut self.step_counters {
                *counter = 0;
            }
        }

        fn write_observations(&self, buffer: &mut [f32]) {
            assert_eq!(buffer.len(), self.n_envs * OBS_DIM);
            for env_idx in 0..self.n_envs {
                let base = (self.frame_counter * 31 + env_idx * 7) % 200;
                let start = env_idx * OBS_DIM;
                for (offset, slot) in buffer[start..start + OBS_DIM].iter_mut().enumerate() {
                    *slot = ((base + offset) % 255) as f32;
                }
            }
        }

        fn step(&mut self, actions: &[u32]) -> StepResult {
            assert_eq!(actions.len(), self.n_envs);
            self.frame_counter += 1;

            let mut rewards = Vec::with_capacity(self.n_envs);
            let mut truncations = Vec::with_capacity(self.n_envs);
            for (env_idx, &action) in actions.iter().enumerate() {
                assert!((action as usize) < self.n_actions, "action out of range");
                self.step_counters[env_idx] += 1;

                rewards.push(if (self.step_counters[env_idx] + env_idx) % 2 == 0 {
                    1.0
                } else {
                    0.0
                });

                let truncated = self.step_counters[env_idx] >= self.episode_len;
                if truncated {
                    self.step_counters[env_idx] = 0;
                }
                truncations.push(truncated);
            }

            StepResult {
                rewards,
                terminals: vec![false; self.n_envs],
                truncations,
            }
        }
    }
}
