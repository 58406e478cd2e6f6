//! Configuration for uncertainty-driven PPO training.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A count parameter (num_envs, num_steps, etc.) must be positive.
    InvalidCount { field: &'static str, value: usize },
    /// A parameter is outside its valid range.
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    /// The flattened batch does not split into equal minibatches.
    IndivisibleBatch {
        batch_size: usize,
        num_minibatches: usize,
    },
    /// The timestep budget is smaller than a single rollout batch.
    BudgetTooSmall {
        total_timesteps: usize,
        batch_size: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCount { field, value } => {
                write!(f, "{} must be > 0, got {}", field, value)
            }
            ConfigError::OutOfRange {
                field,
                value,
                min,
                max,
            } => {
                write!(f, "{} must be in [{}, {}], got {}", field, min, max, value)
            }
            ConfigError::IndivisibleBatch {
                batch_size,
                num_minibatches,
            } => {
                write!(
                    f,
                    "batch_size ({}) must be divisible by num_minibatches ({})",
                    batch_size, num_minibatches
                )
            }
            ConfigError::BudgetTooSmall {
                total_timesteps,
                batch_size,
            } => {
                write!(
                    f,
                    "total_timesteps ({}) must cover at least one batch of {}",
                    total_timesteps, batch_size
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flat hyperparameter surface for a training run.
///
/// `batch_size`, `minibatch_size`, and `num_iterations` are not stored; they
/// are derived deterministically from the fields below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// RNG seed for the backend, samplers, and minibatch shuffling.
    pub seed: u64,
    /// Identifier of the game handed to the environment collaborator.
    pub env_id: String,
    /// Run name used for metrics and the checkpoint manifest.
    /// Defaults to `"<env_id>__seed<seed>"` when empty.
    pub run_name: String,

    /// Number of parallel environments (N).
    pub num_envs: usize,
    /// Steps per environment per rollout (T).
    pub num_steps: usize,
    /// Total environment-step budget for the run.
    pub total_timesteps: usize,

    /// Adam learning rate.
    pub learning_rate: f64,
    /// Whether to anneal the learning rate linearly to zero over the run.
    pub anneal_lr: bool,
    /// Discount factor.
    pub gamma: f32,
    /// GAE trace decay.
    pub gae_lambda: f32,
    /// Number of minibatches per epoch.
    pub num_minibatches: usize,
    /// Optimization epochs per rollout (K).
    pub update_epochs: usize,
    /// Whether to normalize advantages per minibatch.
    pub norm_adv: bool,
    /// Surrogate clipping coefficient.
    pub clip_coef: f32,
    /// Whether to clip the value loss symmetrically to `clip_coef`.
    pub clip_vloss: bool,
    /// Entropy bonus coefficient.
    pub ent_coef: f32,
    /// Value loss coefficient.
    pub vf_coef: f32,
    /// Weight of the intrinsic uncertainty reward.
    pub uncertainty_coef: f32,
    /// Global gradient-norm clip.
    pub max_grad_norm: f32,
    /// Early-stop threshold on the approximate KL divergence (disabled when
    /// `None`).
    pub target_kl: Option<f32>,

    /// Directory for parameter snapshots and the run manifest.
    pub checkpoint_dir: PathBuf,
    /// Iterations between periodic snapshots (0 disables periodic saves; the
    /// final snapshot is always written).
    pub save_interval: usize,
    /// Snapshots to keep on disk (0 keeps all).
    pub keep_last_n: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            env_id: "ALE/SpaceInvaders-v5".to_string(),
            run_name: String::new(),
            num_envs: 16,
            num_steps: 128,
            total_timesteps: 1_000_000,
            learning_rate: 2.5e-4,
            anneal_lr: true,
            gamma: 0.99,
            gae_lambda: 0.95,
            num_minibatches: 4,
            update_epochs: 4,
            norm_adv: true,
            clip_coef: 0.1,
            clip_vloss: true,
            ent_coef: 0.01,
            vf_coef: 0.5,
            uncertainty_coef: 0.1,
            max_grad_norm: 0.5,
            target_kl: None,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            save_interval: 0,
            keep_last_n: 5,
        }
    }
}

impl TrainConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattened rollout size: `num_envs * num_steps`.
    pub fn batch_size(&self) -> usize {
        self.num_envs * self.num_steps
    }

    /// Transitions per minibatch (integer division).
    pub fn minibatch_size(&self) -> usize {
        debug_assert!(self.num_minibatches > 0);
        self.batch_size() / self.num_minibatches
    }

    /// Number of collect/update iterations (integer division).
    pub fn num_iterations(&self) -> usize {
        debug_assert!(self.batch_size() > 0);
        self.total_timesteps / self.batch_size()
    }

    /// Effective run name.
    pub fn resolved_run_name(&self) -> String {
        if self.run_name.is_empty() {
            format!("{}__seed{}", self.env_id, self.seed)
        } else {
            self.run_name.clone()
        }
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_envs == 0 {
            return Err(ConfigError::InvalidCount {
                field: "num_envs",
                value: 0,
            });
        }
        if self.num_steps == 0 {
            return Err(ConfigError::InvalidCount {
                field: "num_steps",
                value: 0,
            });
        }
        if self.num_minibatches == 0 {
            return Err(ConfigError::InvalidCount {
                field: "num_minibatches",
                value: 0,
            });
        }
        if self.update_epochs == 0 {
            return Err(ConfigError::InvalidCount {
                field: "update_epochs",
                value: 0,
            });
        }

        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(ConfigError::OutOfRange {
                field: "gamma",
                value: self.gamma,
                min: 0.0,
                max: 1.0,
            });
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(ConfigError::OutOfRange {
                field: "gae_lambda",
                value: self.gae_lambda,
                min: 0.0,
                max: 1.0,
            });
        }
        if self.clip_coef <= 0.0 || self.clip_coef > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "clip_coef",
                value: self.clip_coef,
                min: 0.0,
                max: 1.0,
            });
        }

        if self.batch_size() % self.num_minibatches != 0 {
            return Err(ConfigError::IndivisibleBatch {
                batch_size: self.batch_size(),
                num_minibatches: self.num_minibatches,
            });
        }
        if self.num_iterations() == 0 {
            return Err(ConfigError::BudgetTooSmall {
                total_timesteps: self.total_timesteps,
                batch_size: self.batch_size(),
            });
        }

        Ok(())
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    // Builder methods.

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_env_id(mut self, env_id: impl Into<String>) -> Self {
        self.env_id = env_id.into();
        self
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = run_name.into();
        self
    }

    pub fn with_num_envs(mut self, n: usize) -> Self {
        self.num_envs = n;
        self
    }

    pub fn with_num_steps(mut self, t: usize) -> Self {
        self.num_steps = t;
        self
    }

    pub fn with_total_timesteps(mut self, total: usize) -> Self {
        self.total_timesteps = total;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_anneal_lr(mut self, anneal: bool) -> Self {
        self.anneal_lr = anneal;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_gae_lambda(mut self, lambda: f32) -> Self {
        self.gae_lambda = lambda;
        self
    }

    pub fn with_num_minibatches(mut self, n: usize) -> Self {
        self.num_minibatches = n;
        self
    }

    pub fn with_update_epochs(mut self, k: usize) -> Self {
        self.update_epochs = k;
        self
    }

    pub fn with_norm_adv(mut self, norm: bool) -> Self {
        self.norm_adv = norm;
        self
    }

    pub fn with_clip_coef(mut self, clip: f32) -> Self {
        self.clip_coef = clip;
        self
    }

    pub fn with_clip_vloss(mut self, clip: bool) -> Self {
        self.clip_vloss = clip;
        self
    }

    pub fn with_ent_coef(mut self, coef: f32) -> Self {
        self.ent_coef = coef;
        self
    }

    pub fn with_vf_coef(mut self, coef: f32) -> Self {
        self.vf_coef = coef;
        self
    }

    pub fn with_uncertainty_coef(mut self, coef: f32) -> Self {
        self.uncertainty_coef = coef;
        self
    }

    pub fn with_max_grad_norm(mut self, norm: f32) -> Self {
        self.max_grad_norm = norm;
        self
    }

    pub fn with_target_kl(mut self, target_kl: Option<f32>) -> Self {
        self.target_kl = target_kl;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_save_interval(mut self, interval: usize) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}
