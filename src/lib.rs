//! # curiosity_ppo: PPO with a temporal-distance uncertainty bonus
//!
//! On-policy training for arcade-style games. A shared convolutional encoder
//! feeds three heads: a categorical policy, a value estimate, and an
//! uncertainty head that predicts how many environment steps separate two
//! embeddings. The uncertainty head is trained by self-supervised regression
//! over sliding windows of recent embeddings, and its prediction error at
//! collection time becomes an intrinsic exploration bonus.
//!
//! ## Training loop
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ per iteration (single thread of control)                │
//! │                                                         │
//! │   Collector ──► RolloutBuffer [T, N]                    │
//! │      │                │                                 │
//! │      │ embeddings     ▼                                 │
//! │      ▼           compute_gae ──► advantages/returns     │
//! │   StatePairBuffer     │                                 │
//! │   (one per env)       ▼                                 │
//! │      └──────────► run_update (K epochs of minibatches,  │
//! │                   clipped PPO + pairwise gap regression)│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use burn::backend::{Autodiff, NdArray};
//! use curiosity_ppo::{ConsoleSink, MultiSink, TrainConfig, Trainer};
//!
//! type B = Autodiff<NdArray<f32>>;
//!
//! let config = TrainConfig::new()
//!     .with_env_id("ALE/SpaceInvaders-v5")
//!     .with_num_envs(16)
//!     .with_total_timesteps(1_000_000);
//!
//! let trainer = Trainer::<B>::new(config, Default::default())?;
//! let sinks = MultiSink::new().with(Box::new(ConsoleSink::new(2048)));
//! let agent = trainer.run(&mut env, sinks)?;
//! ```
//!
//! Evaluation restores a snapshot into a fresh [`Agent`] and replays it
//! through [`evaluator::run_episodes`], which depends only on the
//! [`PolicyModel`] capability interface.

pub mod agent;
pub mod algorithms;
pub mod buffers;
pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod evaluator;
pub mod metrics;
pub mod nn;
pub mod runner;

pub use agent::{Agent, AgentOutput, CategoricalOutput, PolicyModel, EMBED_DIM, PAIR_DIM};
pub use algorithms::{compute_gae, explained_variance, normalize_advantages};
pub use buffers::{PairSet, RolloutBuffer, StatePairBuffer};
pub use checkpoint::{load_snapshot, CheckpointError, Checkpointer};
pub use config::{ConfigError, TrainConfig};
pub use environment::{
    ActionSpace, StepResult, VectorizedGameEnv, FRAME_SIZE, FRAME_STACK, OBS_DIM,
};
pub use evaluator::{ActionSelection, EpisodeReport, EvalConfig};
pub use metrics::{ConsoleSink, CsvSink, MetricsSink, MultiSink, NullSink};
pub use runner::{Collector, RunContext, TrainError, Trainer, UpdateReport};
