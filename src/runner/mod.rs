//! Training session orchestration.
//!
//! One logical thread of control drives the whole run: collect a rollout,
//! estimate advantages, run the PPO update, emit metrics, repeat for
//! `num_iterations`. There is no overlap between phases and no cancellation;
//! a run either completes its iterations or is killed externally.

pub mod collector;
pub mod update;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::fs;
use std::io;
use std::time::Instant;

use crate::agent::{Agent, EMBED_DIM};
use crate::algorithms::gae::compute_gae;
use crate::buffers::RolloutBuffer;
use crate::checkpoint::{CheckpointError, Checkpointer};
use crate::config::{ConfigError, TrainConfig};
use crate::environment::{VectorizedGameEnv, OBS_DIM};
use crate::metrics::{MetricsSink, MultiSink};

pub use collector::Collector;
pub use update::{run_update, UpdateReport};

/// Errors that abort a training run.
#[derive(Debug)]
pub enum TrainError {
    Config(ConfigError),
    Checkpoint(CheckpointError),
    Manifest(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainError::Config(e) => write!(f, "invalid configuration: {}", e),
            TrainError::Checkpoint(e) => write!(f, "checkpoint failure: {}", e),
            TrainError::Manifest(e) => write!(f, "manifest serialization failure: {}", e),
            TrainError::Io(e) => write!(f, "IO failure: {}", e),
        }
    }
}

impl std::error::Error for TrainError {}

impl From<ConfigError> for TrainError {
    fn from(e: ConfigError) -> Self {
        TrainError::Config(e)
    }
}

impl From<CheckpointError> for TrainError {
    fn from(e: CheckpointError) -> Self {
        TrainError::Checkpoint(e)
    }
}

impl From<serde_json::Error> for TrainError {
    fn from(e: serde_json::Error) -> Self {
        TrainError::Manifest(e)
    }
}

impl From<io::Error> for TrainError {
    fn from(e: io::Error) -> Self {
        TrainError::Io(e)
    }
}

/// Explicit run state threaded through every phase: run identity, the global
/// step counter, wall-clock origin, and the metrics sinks. Replaces ambient
/// globals.
pub struct RunContext {
    pub run_name: String,
    pub global_step: usize,
    started: Instant,
    sinks: MultiSink,
}

impl RunContext {
    pub fn new(run_name: String, sinks: MultiSink) -> Self {
        Self {
            run_name,
            global_step: 0,
            started: Instant::now(),
            sinks,
        }
    }

    /// Advance the global step counter by `steps` environment steps.
    pub fn advance(&mut self, steps: usize) {
        self.global_step += steps;
    }

    /// Record a scalar at the current global step.
    pub fn emit(&mut self, key: &str, value: f32) {
        self.sinks.record(key, self.global_step, value);
    }

    /// Environment steps per wall-clock second since the run started.
    pub fn steps_per_second(&self) -> f32 {
        let elapsed = self.started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            self.global_step as f32 / elapsed
        } else {
            0.0
        }
    }

    pub fn flush(&mut self) {
        self.sinks.flush();
    }
}

/// Synchronous PPO trainer with the temporal-distance uncertainty bonus.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer after validating the configuration.
    pub fn new(config: TrainConfig, device: B::Device) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, device })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Run the full training loop and return the trained agent.
    ///
    /// Panics if the environment does not expose a discrete action space or
    /// disagrees with the configured environment count; both are contract
    /// violations, not recoverable conditions.
    pub fn run<E: VectorizedGameEnv>(
        &self,
        env: &mut E,
        sinks: MultiSink,
    ) -> Result<Agent<B>, TrainError> {
        let config = &self.config;
        assert_eq!(
            env.n_envs(),
            config.num_envs,
            "environment count must match num_envs"
        );
        let n_actions = env
            .action_space()
            .n_discrete()
            .expect("only discrete action spaces are supported");

        B::seed(&self.device, config.seed);
        fastrand::seed(config.seed);
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut agent = Agent::<B>::new(n_actions, &self.device);
        let mut optimizer = AdamConfig::new()
            .with_epsilon(1e-5)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)))
            .init();

        let mut checkpointer = Checkpointer::new(
            &config.checkpoint_dir,
            config.save_interval,
            config.keep_last_n,
        )?;
        let manifest = serde_json::to_string_pretty(config)?;
        fs::write(checkpointer.dir().join("config.json"), manifest)?;

        let mut ctx = RunContext::new(config.resolved_run_name(), sinks);
        let mut collector = Collector::new(config.num_envs, config.num_steps);
        collector.attach(env, config.seed);
        let mut rollout =
            RolloutBuffer::new(config.num_envs, config.num_steps, OBS_DIM, EMBED_DIM);

        let num_iterations = config.num_iterations();
        log::info!(
            "run {}: {} iterations of {} x {} steps",
            ctx.run_name,
            num_iterations,
            config.num_envs,
            config.num_steps
        );

        for iteration in 1..=num_iterations {
            let learning_rate = if config.anneal_lr {
                let frac = 1.0 - (iteration as f64 - 1.0) / num_iterations as f64;
                config.learning_rate * frac
            } else {
                config.learning_rate
            };

            // Phase 1: collect, on the inner backend without autodiff.
            rollout.clear();
            let inference = agent.valid();
            collector.collect(
                &inference,
                env,
                &mut rollout,
                config.uncertainty_coef,
                &mut ctx,
                &self.device,
            );

            // Phase 2: bootstrap and advantage estimation.
            let next_values = collector.bootstrap_values(&inference, &self.device);
            let next_dones = collector.latest_dones().to_vec();
            let (advantages, returns) = compute_gae(
                &rollout.rewards,
                &rollout.values,
                &rollout.dones,
                &next_dones,
                &next_values,
                config.num_envs,
                config.gamma,
                config.gae_lambda,
            );

            // Phase 3: optimize.
            let (updated, report) = run_update(
                agent,
                &mut optimizer,
                &rollout,
                &advantages,
                &returns,
                collector.pair_buffers(),
                config,
                learning_rate,
                &mut rng,
                &self.device,
            );
            agent = updated;

            let sps = ctx.steps_per_second();
            ctx.emit("charts/learning_rate", learning_rate as f32);
            ctx.emit("losses/value_loss", report.value_loss);
            ctx.emit("losses/policy_loss", report.policy_loss);
            ctx.emit("losses/entropy", report.entropy);
            ctx.emit("losses/uncertainty_loss", report.uncertainty_loss);
            ctx.emit("losses/old_approx_kl", report.old_approx_kl);
            ctx.emit("losses/approx_kl", report.approx_kl);
            ctx.emit("losses/clipfrac", report.clip_fraction);
            ctx.emit("losses/explained_variance", report.explained_variance);
            ctx.emit("charts/steps_per_second", sps);

            if checkpointer.should_save(iteration) {
                checkpointer.save::<B, _>(&agent, ctx.global_step)?;
            }
        }

        checkpointer.save::<B, _>(&agent, ctx.global_step)?;
        ctx.flush();

        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::synthetic::SyntheticEnv;
    use crate::environment::{FRAME_SIZE, FRAME_STACK};
    use crate::metrics::recording::{values_for, SharedRecordingSink};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::backend::Backend;
    use burn::tensor::Tensor;

    type B = Autodiff<NdArray<f32>>;

    fn device() -> <B as Backend>::Device {
        Default::default()
    }

    fn smoke_config(dir: &std::path::Path) -> TrainConfig {
        TrainConfig::new()
            .with_seed(17)
            .with_env_id("synthetic")
            .with_num_envs(2)
            .with_num_steps(4)
            .with_num_minibatches(4)
            .with_update_epochs(2)
            .with_total_timesteps(8)
            .with_checkpoint_dir(dir)
    }

    #[test]
    fn test_one_iteration_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = smoke_config(dir.path());

        // Reconstruct the trainer's initial weights: it seeds the backend
        // with config.seed before building its agent.
        <B as Backend>::seed(&device(), config.seed);
        let initial: Agent<B> = Agent::new(3, &device());

        let sink = SharedRecordingSink::new();
        let records = sink.handle();

        let trainer = Trainer::<B>::new(config.clone(), device()).unwrap();
        let mut env = SyntheticEnv::new(2, 3, 3);
        let trained = trainer
            .run(&mut env, MultiSink::new().with(Box::new(sink)))
            .unwrap();

        // Every loss component was emitted once and is finite.
        let records = records.lock().unwrap();
        for key in [
            "losses/policy_loss",
            "losses/value_loss",
            "losses/entropy",
            "losses/uncertainty_loss",
            "losses/approx_kl",
            "losses/old_approx_kl",
            "losses/clipfrac",
            "charts/learning_rate",
            "charts/steps_per_second",
        ] {
            let values = values_for(&records, key);
            assert_eq!(values.len(), 1, "missing metric {}", key);
            assert!(values[0].is_finite(), "{} is not finite", key);
        }

        // All pair buffers were warm after T=4 steps, so the auxiliary loss
        // contributed.
        let uncertainty = values_for(&records, "losses/uncertainty_loss")[0];
        assert!(uncertainty > 0.0);

        // Parameters moved: the critic answers differently than at init.
        let obs = Tensor::<B, 4>::zeros([1, FRAME_STACK, FRAME_SIZE, FRAME_SIZE], &device());
        let before = initial.value(obs.clone()).into_data();
        let after = trained.value(obs).into_data();
        assert_ne!(
            before.as_slice::<f32>().unwrap(),
            after.as_slice::<f32>().unwrap(),
            "update left the parameters untouched"
        );

        // The final snapshot and the run manifest were written.
        assert!(dir.path().join("config.json").exists());
        let snapshots: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("snapshot_")
            })
            .collect();
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn test_trainer_rejects_invalid_config() {
        let config = TrainConfig::new().with_num_envs(0);
        assert!(Trainer::<B>::new(config, device()).is_err());
    }

    #[test]
    #[should_panic(expected = "environment count must match num_envs")]
    fn test_trainer_rejects_env_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = smoke_config(dir.path());
        let trainer = Trainer::<B>::new(config, device()).unwrap();
        let mut env = SyntheticEnv::new(3, 3, 3);
        let _ = trainer.run(&mut env, MultiSink::new());
    }
}
