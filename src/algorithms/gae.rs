//! Generalized Advantage Estimation.
//!
//! Single source of truth for advantages and returns; no other component
//! recomputes them.
//!
//! A_t = δ_t + γλ (1 - done_{t+1}) A_{t+1}
//! δ_t = r_t + γ V(s_{t+1}) (1 - done_{t+1}) - V(s_t)
//!
//! Done flags are indexed at `t+1`: `dones[t]` marks that the observation at
//! step `t` opened a fresh episode, so the flag that cuts the recurrence
//! between `t` and `t+1` is the one recorded with step `t+1`. At the horizon
//! the bootstrap value and the post-rollout done flags substitute for step T.

/// Compute advantages and returns over a `[T, N]` step-major rollout.
///
/// # Arguments
///
/// * `rewards` / `values` / `dones` - rollout arrays `[T * N]`
/// * `next_dones` - done flags after the final collected step `[N]`
/// * `next_values` - bootstrap values for the post-rollout observations `[N]`
/// * `n_envs` - number of parallel environments N
/// * `gamma` - discount factor
/// * `gae_lambda` - trace decay
///
/// # Returns
///
/// `(advantages, returns)`, both `[T * N]` with `returns = advantages + values`.
#[allow(clippy::too_many_arguments)]
pub fn compute_gae(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    next_dones: &[bool],
    next_values: &[f32],
    n_envs: usize,
    gamma: f32,
    gae_lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    let total = rewards.len();
    assert_eq!(values.len(), total);
    assert_eq!(dones.len(), total);
    assert_eq!(next_dones.len(), n_envs);
    assert_eq!(next_values.len(), n_envs);
    assert!(n_envs > 0 && total % n_envs == 0);

    let horizon = total / n_envs;
    let mut advantages = vec![0.0f32; total];
    let mut returns = vec![0.0f32; total];

    for env in 0..n_envs {
        let mut gae = 0.0f32;
        for t in (0..horizon).rev() {
            let idx = t * n_envs + env;
            let (nonterminal, next_value) = if t == horizon - 1 {
                (
                    if next_dones[env] { 0.0 } else { 1.0 },
                    next_values[env],
                )
            } else {
                let next_idx = (t + 1) * n_envs + env;
                (
                    if dones[next_idx] { 0.0 } else { 1.0 },
                    values[next_idx],
                )
            };

            let delta = rewards[idx] + gamma * next_value * nonterminal - values[idx];
            gae = delta + gamma * gae_lambda * nonterminal * gae;

            advantages[idx] = gae;
            returns[idx] = gae + values[idx];
        }
    }

    (advantages, returns)
}

/// Normalize to zero mean and unit variance in place (population variance,
/// 1e-8 epsilon). Slices shorter than two elements are zeroed, since no
/// meaningful variance exists.
pub fn normalize_advantages(advantages: &mut [f32]) {
    if advantages.len() < 2 {
        for a in advantages.iter_mut() {
            *a = 0.0;
        }
        return;
    }

    let n = advantages.len() as f32;
    let mean = advantages.iter().sum::<f32>() / n;
    let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt() + 1e-8;

    for a in advantages.iter_mut() {
        *a = (*a - mean) / std;
    }
}
