/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared numeric and random-draw utilities for the zone sampler.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Helpers for stable log-space arithmetic, masked Dirichlet draws and
//! densities, and small categorical sampling routines shared by the operators.

use rand::RngExt;
use rand::rngs::StdRng;
use statrs::function::gamma::ln_gamma;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Normalize non-negative values in place to sum to one.
///
/// Returns `false` (leaving values untouched) when the sum is not a positive
/// finite number.
pub fn normalize_in_place(values: &mut [f64]) -> bool {
    let total = values.iter().sum::<f64>();
    if !(total.is_finite() && total > 0.0) {
        return false;
    }
    for value in values.iter_mut() {
        *value /= total;
    }
    true
}

#[must_use]
pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|value| value.is_finite())
}

pub fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Marsaglia-Tsang gamma draw; `NaN` for non-positive parameters.
pub fn sample_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let shape_minus_third = shape - (1.0 / 3.0);
    let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
    loop {
        let standard_normal = sample_standard_normal(rng);
        let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
        if one_plus_coeff_noise <= 0.0 {
            continue;
        }
        let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
        let uniform = rng.random::<f64>();
        if uniform
            < (0.0331 * standard_normal * standard_normal * standard_normal)
                .mul_add(-standard_normal, 1.0)
        {
            return scale * shape_minus_third * cubic_term;
        }
        if uniform.ln()
            < (0.5 * standard_normal).mul_add(
                standard_normal,
                shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
            )
        {
            return scale * shape_minus_third * cubic_term;
        }
    }
}

/// Dirichlet draw over the entries with positive concentration.
///
/// Entries with `alpha <= 0` are masked and come back as exactly `0`. A
/// degenerate draw (all gammas underflowing) yields `NaN` entries so callers
/// can surface it instead of silently continuing.
pub fn sample_dirichlet(rng: &mut StdRng, alpha: &[f64]) -> Vec<f64> {
    let mut draw = alpha
        .iter()
        .map(|a| if *a > 0.0 { sample_gamma(rng, *a, 1.0) } else { 0.0 })
        .collect::<Vec<_>>();
    if !normalize_in_place(&mut draw) {
        draw.fill(f64::NAN);
    }
    draw
}

/// Log-density of a Dirichlet over the entries with positive concentration.
///
/// Masked entries (`alpha <= 0`) are ignored and must hold zero.
#[must_use]
pub fn log_dirichlet_density(values: &[f64], alpha: &[f64]) -> f64 {
    let mut alpha_sum = 0.0;
    let mut log_norm = 0.0;
    let mut kernel = 0.0;
    for (value, a) in values.iter().zip(alpha) {
        if *a <= 0.0 {
            if *value != 0.0 {
                return f64::NEG_INFINITY;
            }
            continue;
        }
        alpha_sum += a;
        log_norm += ln_gamma(*a);
        if *a != 1.0 {
            kernel += (a - 1.0) * value.ln();
        }
    }
    ln_gamma(alpha_sum) - log_norm + kernel
}

/// Draw an index proportionally to non-negative `weights`.
///
/// Returns `None` when the weights do not have a positive finite sum.
pub fn sample_categorical(rng: &mut StdRng, weights: &[f64]) -> Option<usize> {
    let total = weights.iter().sum::<f64>();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let mut threshold = rng.random::<f64>() * total;
    let mut last_positive = None;
    for (index, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        last_positive = Some(index);
        if threshold < *weight {
            return Some(index);
        }
        threshold -= weight;
    }
    last_positive
}

/// Uniformly pick one element of a non-empty slice.
pub fn choose<T: Copy>(rng: &mut StdRng, values: &[T]) -> Option<T> {
    if values.is_empty() {
        None
    } else {
        Some(values[rng.random_range(0..values.len())])
    }
}

/// Mask with exactly `min(k, n)` uniformly chosen entries set.
pub fn random_subset(rng: &mut StdRng, n: usize, k: usize) -> Vec<bool> {
    let mut indices = (0..n).collect::<Vec<_>>();
    let take = k.min(n);
    for position in 0..take {
        let swap_with = rng.random_range(position..n);
        indices.swap(position, swap_with);
    }
    let mut mask = vec![false; n];
    for index in indices.into_iter().take(take) {
        mask[index] = true;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn dirichlet_respects_mask() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let draw = sample_dirichlet(&mut rng, &[2.0, 0.0, 3.0]);
            assert!(draw[1].abs() < f64::EPSILON);
            assert_relative_eq!(draw.iter().sum::<f64>(), 1.0, epsilon = 1.0e-12);
        }
    }

    #[test]
    fn uniform_dirichlet_density_is_log_factorial() {
        // Dirichlet(1, 1, 1) has constant density Gamma(3) = 2.
        let density = log_dirichlet_density(&[0.2, 0.3, 0.5], &[1.0, 1.0, 1.0]);
        assert_relative_eq!(density, 2.0_f64.ln(), epsilon = 1.0e-10);
    }

    #[test]
    fn masked_density_rejects_mass_on_masked_entry() {
        let density = log_dirichlet_density(&[0.5, 0.5], &[1.0, 0.0]);
        assert_eq!(density, f64::NEG_INFINITY);
    }

    #[test]
    fn gamma_mean_is_close_to_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let mean = (0..n).map(|_| sample_gamma(&mut rng, 3.0, 1.0)).sum::<f64>() / usize_to_f64(n);
        assert!((mean - 3.0).abs() < 0.1);
    }

    #[test]
    fn categorical_skips_zero_weights() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let index = sample_categorical(&mut rng, &[0.0, 1.0, 0.0]).expect("positive mass");
            assert_eq!(index, 1);
        }
        assert!(sample_categorical(&mut rng, &[0.0, 0.0]).is_none());
    }

    #[test]
    fn random_subset_has_requested_size() {
        let mut rng = StdRng::seed_from_u64(5);
        let mask = random_subset(&mut rng, 20, 7);
        assert_eq!(mask.iter().filter(|flag| **flag).count(), 7);
        let all = random_subset(&mut rng, 3, 10);
        assert!(all.iter().all(|flag| *flag));
    }
}
