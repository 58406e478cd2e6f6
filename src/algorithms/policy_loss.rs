//! Loss functions and update diagnostics for the PPO objective.
//!
//! Tensor functions carry gradients; diagnostics are computed from detached
//! f32 data and never influence control flow in here.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Log ratios are clamped here before `exp()`; e^20 is already ~485 million,
/// far beyond any meaningful importance ratio.
const MAX_LOG_RATIO: f32 = 20.0;

/// PPO clipped surrogate loss.
///
/// `L = -E[min(r_t A_t, clip(r_t, 1-ε, 1+ε) A_t)]`, the pessimistic bound on
/// the ratio-weighted advantage. Negated for minimization.
pub fn clipped_policy_loss<B: Backend>(
    log_probs: Tensor<B, 1>,
    old_log_probs: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    clip_coef: f32,
) -> Tensor<B, 1> {
    let log_ratio = (log_probs - old_log_probs).clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO);
    let ratio = log_ratio.exp();
    let clipped_ratio = ratio.clone().clamp(1.0 - clip_coef, 1.0 + clip_coef);

    let surr1 = ratio * advantages.clone();
    let surr2 = clipped_ratio * advantages;

    -surr1.min_pair(surr2).mean()
}

/// Value loss: squared error against returns, scaled by 0.5.
///
/// With `clip` set, predictions are also clipped to within ±clip of the old
/// values and the elementwise maximum of both errors is taken (conservative
/// update, symmetric to the policy ratio clip).
pub fn clipped_value_loss<B: Backend>(
    values: Tensor<B, 1>,
    old_values: Tensor<B, 1>,
    returns: Tensor<B, 1>,
    clip: Option<f32>,
) -> Tensor<B, 1> {
    match clip {
        Some(clip) => {
            let unclipped = (values.clone() - returns.clone()).powf_scalar(2.0);
            let values_clipped =
                old_values.clone() + (values - old_values).clamp(-clip, clip);
            let clipped = (values_clipped - returns).powf_scalar(2.0);
            unclipped.max_pair(clipped).mean().mul_scalar(0.5)
        }
        None => (values - returns).powf_scalar(2.0).mean().mul_scalar(0.5),
    }
}

/// Mean-squared error between predicted and actual step gaps `[n, 1]`.
pub fn gap_regression_loss<B: Backend>(
    predicted: Tensor<B, 2>,
    actual: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let per_pair: Tensor<B, 1> = (predicted - actual).powf_scalar(2.0).flatten(0, 1);
    per_pair.mean()
}

/// Detached per-minibatch policy diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyDiagnostics {
    /// `E[-log r]`, the naive KL estimator.
    pub old_approx_kl: f32,
    /// `E[(r - 1) - log r]`, the low-variance KL estimator.
    pub approx_kl: f32,
    /// Fraction of samples where the ratio left the clip interval.
    pub clip_fraction: f32,
}

/// Compute both KL estimates and the clip fraction from detached log ratios.
pub fn policy_diagnostics(log_ratios: &[f32], clip_coef: f32) -> PolicyDiagnostics {
    if log_ratios.is_empty() {
        return PolicyDiagnostics::default();
    }

    let n = log_ratios.len() as f32;
    let mut old_kl = 0.0f32;
    let mut kl = 0.0f32;
    let mut clipped = 0usize;

    for &lr in log_ratios {
        let ratio = lr.clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO).exp();
        old_kl += -lr;
        kl += (ratio - 1.0) - lr;
        if (ratio - 1.0).abs() > clip_coef {
            clipped += 1;
        }
    }

    PolicyDiagnostics {
        old_approx_kl: old_kl / n,
        approx_kl: kl / n,
        clip_fraction: clipped as f32 / n,
    }
}

/// Explained variance of value predictions:
/// `1 - Var(actual - predicted) / Var(actual)`.
///
/// Degrades to NaN when the actual returns have zero variance; callers log
/// the sentinel as-is instead of branching on it.
pub fn explained_variance(predicted: &[f32], actual: &[f32]) -> f32 {
    assert_eq!(predicted.len(), actual.len());
    if actual.is_empty() {
        return f32::NAN;
    }

    let n = actual.len() as f32;
    let mean_actual = actual.iter().sum::<f32>() / n;
    let var_actual = actual
        .iter()
        .map(|y| (y - mean_actual).powi(2))
        .sum::<f32>()
        / n;

    if var_actual == 0.0 {
        return f32::NAN;
    }

    let residuals: Vec<f32> = actual
        .iter()
        .zip(predicted.iter())
        .map(|(y, p)| y - p)
        .collect();
    let mean_res = residuals.iter().sum::<f32>() / n;
    let var_res = residuals.iter().map(|r| (r - mean_res).powi(2)).sum::<f32>() / n;

    1.0 - var_res / var_actual
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().as_slice::<f32>().unwrap()[0]
    }

    fn tensor1(values: &[f32]) -> Tensor<TestBackend, 1> {
        Tensor::from_floats(values, &device())
    }

    fn policy_loss_at(ratio: f32, advantage: f32, clip_coef: f32) -> f32 {
        // old log prob 0, new log prob ln(ratio) gives exactly this ratio.
        scalar(clipped_policy_loss(
            tensor1(&[ratio.ln()]),
            tensor1(&[0.0]),
            tensor1(&[advantage]),
            clip_coef,
        ))
    }

    #[test]
    fn test_identical_policies_recover_surrogate() {
        // ratio 1.0 everywhere: loss = -mean(advantages).
        let loss = scalar(clipped_policy_loss(
            tensor1(&[-1.0, -1.0]),
            tensor1(&[-1.0, -1.0]),
            tensor1(&[1.0, 3.0]),
            0.2,
        ));
        assert!((loss - (-2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_clip_is_never_more_favorable() {
        let clip_coef = 0.2f32;
        // Sweep boundary and out-of-bound ratios for both advantage signs:
        // the clipped loss must never drop below the unclipped surrogate.
        for &ratio in &[0.5, 1.0 - clip_coef, 1.0, 1.0 + clip_coef, 2.0] {
            for &advantage in &[1.5f32, -1.5] {
                let loss = policy_loss_at(ratio, advantage, clip_coef);
                let unclipped = -ratio * advantage;
                assert!(
                    loss >= unclipped - 1e-5,
                    "ratio {} adv {}: loss {} < unclipped {}",
                    ratio,
                    advantage,
                    loss,
                    unclipped
                );
            }
        }
    }

    #[test]
    fn test_boundary_ratios_match_unclipped() {
        // At exactly 1±ε the clipped and unclipped surrogates coincide.
        let clip_coef = 0.2f32;
        for &ratio in &[1.0 - clip_coef, 1.0 + clip_coef] {
            for &advantage in &[1.0f32, -1.0] {
                let loss = policy_loss_at(ratio, advantage, clip_coef);
                assert!(
                    (loss - (-ratio * advantage)).abs() < 1e-5,
                    "ratio {} adv {}",
                    ratio,
                    advantage
                );
            }
        }
    }

    #[test]
    fn test_out_of_bound_ratio_is_clipped_for_positive_advantage() {
        // ratio e ≈ 2.718 with clip 0.2: surrogate pinned at 1.2 * adv.
        let loss = policy_loss_at(std::f32::consts::E, 1.0, 0.2);
        assert!((loss - (-1.2)).abs() < 1e-4);
    }

    #[test]
    fn test_value_loss_unclipped() {
        let loss = scalar(clipped_value_loss(
            tensor1(&[1.0, 2.0]),
            tensor1(&[1.0, 2.0]),
            tensor1(&[2.0, 4.0]),
            None,
        ));
        // 0.5 * mean(1, 4) = 1.25
        assert!((loss - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_value_loss_clip_takes_worse_error() {
        // Old value 0, new value 1, return 1, clip 0.2: the clipped
        // prediction is pinned at 0.2, so its error (0.64) dominates the
        // unclipped error (0).
        let loss = scalar(clipped_value_loss(
            tensor1(&[1.0]),
            tensor1(&[0.0]),
            tensor1(&[1.0]),
            Some(0.2),
        ));
        assert!((loss - 0.5 * 0.64).abs() < 1e-5);
    }

    #[test]
    fn test_gap_regression_loss() {
        let pred = tensor1(&[1.0, 3.0]).reshape([2, 1]);
        let actual = tensor1(&[0.0, 1.0]).reshape([2, 1]);
        let loss = scalar(gap_regression_loss(pred, actual));
        // mean(1, 4) = 2.5
        assert!((loss - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_policy_diagnostics() {
        // Identical policies: every estimate is zero.
        let diag = policy_diagnostics(&[0.0, 0.0], 0.2);
        assert_eq!(diag.old_approx_kl, 0.0);
        assert_eq!(diag.approx_kl, 0.0);
        assert_eq!(diag.clip_fraction, 0.0);

        // One in-range, one far-out ratio.
        let log_ratios = [0.0f32, 1.0];
        let diag = policy_diagnostics(&log_ratios, 0.2);
        // E[-log r] = (0 + -1) / 2 = -0.5
        assert!((diag.old_approx_kl - (-0.5)).abs() < 1e-5);
        // E[(r-1) - log r] = (0 + (e - 1 - 1)) / 2
        let expected = (std::f32::consts::E - 2.0) / 2.0;
        assert!((diag.approx_kl - expected).abs() < 1e-5);
        assert_eq!(diag.clip_fraction, 0.5);
    }

    #[test]
    fn test_explained_variance_sentinel() {
        // Zero-variance targets degrade to NaN, never panic.
        assert!(explained_variance(&[0.5, 0.6], &[1.0, 1.0]).is_nan());
        assert!(explained_variance(&[], &[]).is_nan());

        // Perfect predictions explain everything.
        let ev = explained_variance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((ev - 1.0).abs() < 1e-6);

        // Constant predictor of the mean explains nothing.
        let ev = explained_variance(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]);
        assert!(ev.abs() < 1e-6);
    }
}
