//! PPO optimization phase.
//!
//! Consumes one flattened rollout for `update_epochs` epochs of shuffled
//! minibatches. Each minibatch recomputes the policy under current
//! parameters, assembles the clipped losses plus the auxiliary
//! temporal-distance regression, and applies one optimizer step. The epoch
//! loop breaks early when the approximate KL divergence crosses `target_kl`.

use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;

use crate::agent::Agent;
use crate::algorithms::gae::normalize_advantages;
use crate::algorithms::policy_loss::{
    clipped_policy_loss, clipped_value_loss, explained_variance, gap_regression_loss,
    policy_diagnostics,
};
use crate::buffers::rollout::generate_minibatches;
use crate::buffers::{RolloutBuffer, StatePairBuffer};
use crate::config::TrainConfig;

/// Loss components and diagnostics from one update phase.
///
/// Loss values come from the final minibatch processed; `clip_fraction`
/// averages over every minibatch. Diagnostics feed logging only and never
/// drive control flow (except `approx_kl` via the configured early stop).
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateReport {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub uncertainty_loss: f32,
    pub old_approx_kl: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    pub explained_variance: f32,
    /// Epochs actually run before a KL early stop (== `update_epochs` when
    /// no stop triggered).
    pub epochs_run: usize,
}

fn scalar<B: AutodiffBackend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_data().as_slice::<f32>().expect("scalar")[0]
}

/// Run the full epoch/minibatch update and return the updated agent.
#[allow(clippy::too_many_arguments)]
pub fn run_update<B, O>(
    mut agent: Agent<B>,
    optimizer: &mut O,
    rollout: &RolloutBuffer,
    advantages: &[f32],
    returns: &[f32],
    pair_buffers: &[StatePairBuffer],
    config: &TrainConfig,
    learning_rate: f64,
    rng: &mut StdRng,
    device: &B::Device,
) -> (Agent<B>, UpdateReport)
where
    B: AutodiffBackend,
    O: Optimizer<Agent<B>, B>,
{
    let batch_size = rollout.len();
    debug_assert_eq!(advantages.len(), batch_size);
    debug_assert_eq!(returns.len(), batch_size);

    let minibatch_size = config.minibatch_size();
    let mut report = UpdateReport::default();
    let mut clip_fractions: Vec<f32> = Vec::new();

    'epochs: for _epoch in 0..config.update_epochs {
        let minibatches = generate_minibatches(batch_size, minibatch_size, rng);
        report.epochs_run += 1;

        for indices in &minibatches {
            let mb = rollout.extract(advantages, returns, indices);

            // Recompute log-probs, entropy, and values under the current
            // parameters for the stored actions.
            let output = agent.forward(mb.obs_tensor::<B>(device));
            let new_log_probs = output.policy.log_prob(&mb.actions, device);
            let entropy_mean = output.policy.entropy().mean();
            let values = output.values_flat();

            let old_log_probs = mb.old_log_probs_tensor::<B>(device);
            let log_ratio = new_log_probs.clone() - old_log_probs.clone();
            let log_ratio_data = log_ratio.into_data();
            let diagnostics = policy_diagnostics(
                log_ratio_data.as_slice::<f32>().expect("log ratios"),
                config.clip_coef,
            );
            report.old_approx_kl = diagnostics.old_approx_kl;
            report.approx_kl = diagnostics.approx_kl;
            clip_fractions.push(diagnostics.clip_fraction);

            let mut mb_advantages = mb.advantages.clone();
            if config.norm_adv {
                normalize_advantages(&mut mb_advantages);
            }
            let advantages_tensor: Tensor<B, 1> =
                Tensor::from_floats(mb_advantages.as_slice(), device);

            let policy_loss = clipped_policy_loss(
                new_log_probs,
                old_log_probs,
                advantages_tensor,
                config.clip_coef,
            );
            let value_loss = clipped_value_loss(
                values,
                mb.old_values_tensor::<B>(device),
                mb.returns_tensor::<B>(device),
                config.clip_vloss.then_some(config.clip_coef),
            );

            // Auxiliary regression over every environment's full pair set,
            // regenerated each minibatch. Cold buffers (fewer than two
            // entries) are skipped; the mean runs over contributors.
            let mut gap_losses: Vec<Tensor<B, 1>> = Vec::new();
            for buffer in pair_buffers {
                if let Some(pairs) = buffer.all_pairs() {
                    let predicted = agent.predict_gap(
                        pairs.earlier_tensor::<B>(device),
                        pairs.later_tensor::<B>(device),
                    );
                    gap_losses.push(gap_regression_loss(
                        predicted,
                        pairs.gaps_tensor::<B>(device),
                    ));
                }
            }
            let uncertainty_loss = match gap_losses.len() {
                0 => Tensor::<B, 1>::zeros([1], device),
                n => {
                    let sum = gap_losses
                        .into_iter()
                        .reduce(|a, b| a + b)
                        .expect("non-empty");
                    sum.div_scalar(n as f32)
                }
            };

            let total_loss = policy_loss.clone()
                - entropy_mean.clone().mul_scalar(config.ent_coef)
                + value_loss.clone().mul_scalar(config.vf_coef)
                + uncertainty_loss.clone();

            report.policy_loss = scalar(&policy_loss);
            report.value_loss = scalar(&value_loss);
            report.entropy = scalar(&entropy_mean);
            report.uncertainty_loss = scalar(&uncertainty_loss);

            let grads = total_loss.backward();
            let grads = GradientsParams::from_grads(grads, &agent);
            agent = optimizer.step(learning_rate, agent, grads);
        }

        // The original checks once per epoch, with the last minibatch's
        // estimate.
        if let Some(target_kl) = config.target_kl {
            if report.approx_kl > target_kl {
                log::debug!(
                    "KL early stop: approx_kl={:.5} > target_kl={:.5}",
                    report.approx_kl,
                    target_kl
                );
                break 'epochs;
            }
        }
    }

    if !clip_fractions.is_empty() {
        report.clip_fraction =
            clip_fractions.iter().sum::<f32>() / clip_fractions.len() as f32;
    }
    report.explained_variance = explained_variance(&rollout.values, returns);

    (agent, report)
}
