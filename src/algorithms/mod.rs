//! Advantage estimation and PPO loss functions.

pub mod gae;
pub mod policy_loss;

pub use gae::{compute_gae, normalize_advantages};
pub use policy_loss::{
    clipped_policy_loss, clipped_value_loss, explained_variance, gap_regression_loss,
    policy_diagnostics, PolicyDiagnostics,
};
