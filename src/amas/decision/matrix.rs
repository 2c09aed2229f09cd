//! Dense row-major linear algebra for the ridge bandit.

pub const MIN_LAMBDA: f64 = 1e-3;
pub const MIN_RANK1_DIAG: f64 = 1e-6;
pub const MAX_COVARIANCE: f64 = 1e9;
pub const MAX_FEATURE_ABS: f64 = 50.0;
pub const EPSILON: f64 = 1e-10;
const MAX_CONDITION_ESTIMATE: f64 = 1e8;
const FULL_RECOMPUTE_EVERY: u64 = 100;

pub fn identity_scaled(d: usize, scale: f64) -> Vec<f64> {
    let mut m = vec![0.0; d * d];
    for i in 0..d {
        m[i * d + i] = scale;
    }
    m
}

/// Lower-triangular `L` with `L·Lᵗ = A`. Non-positive pivots are repaired with `√λ`.
pub fn cholesky_decompose(a: &[f64], d: usize, lambda: f64) -> Vec<f64> {
    let safe_lambda = lambda.max(MIN_LAMBDA);
    let mut l = vec![0.0; d * d];

    for i in 0..d {
        for j in 0..=i {
            let mut sum = a[i * d + j];
            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }

            if i == j {
                l[i * d + i] = if sum > EPSILON && sum.is_finite() {
                    sum.sqrt()
                } else {
                    safe_lambda.sqrt()
                };
            } else {
                let diag = l[j * d + j];
                l[i * d + j] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
            }
        }
    }

    l
}

/// Givens-rotation update so that `L'·L'ᵗ = L·Lᵗ + x·xᵗ`.
///
/// Returns `false` when a pivot collapses; `l` must then be rebuilt from `A`.
pub fn cholesky_rank1_update(l: &mut [f64], x: &[f64], d: usize) -> bool {
    let mut work = x.to_vec();

    for k in 0..d {
        let l_kk = l[k * d + k];
        let x_k = work[k];
        let r = (l_kk * l_kk + x_k * x_k).sqrt();

        if !r.is_finite() || r < MIN_RANK1_DIAG {
            return false;
        }

        let c = l_kk / r;
        let s = x_k / r;
        l[k * d + k] = r;

        for i in (k + 1)..d {
            let l_ik = l[i * d + k];
            let x_i = work[i];
            l[i * d + k] = c * l_ik + s * x_i;
            work[i] = -s * l_ik + c * x_i;
        }
    }

    (0..d).all(|i| {
        let diag = l[i * d + i];
        diag.is_finite() && diag >= MIN_RANK1_DIAG
    })
}

pub fn solve_lower(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let mut y = vec![0.0; d];
    for i in 0..d {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * d + j] * y[j];
        }
        let diag = l[i * d + i];
        y[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    y
}

fn solve_upper_transposed(l: &[f64], y: &[f64], d: usize) -> Vec<f64> {
    let mut x = vec![0.0; d];
    for i in (0..d).rev() {
        let mut sum = y[i];
        for j in (i + 1)..d {
            sum -= l[j * d + i] * x[j];
        }
        let diag = l[i * d + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

/// Solves `A·x = b` given the factor of `A`.
pub fn solve_cholesky(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let y = solve_lower(l, b, d);
    solve_upper_transposed(l, &y, d)
}

/// `xᵗ·A⁻¹·x = ‖L⁻¹x‖²`.
pub fn quadratic_form(l: &[f64], x: &[f64], d: usize) -> f64 {
    solve_lower(l, x, d).iter().map(|v| v * v).sum()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn rank1_add(a: &mut [f64], x: &[f64], d: usize) {
    for i in 0..d {
        for j in 0..d {
            a[i * d + j] += x[i] * x[j];
        }
    }
}

pub fn add_scaled(a: &mut [f64], b: &[f64], scale: f64) {
    for (ai, bi) in a.iter_mut().zip(b) {
        *ai += scale * bi;
    }
}

pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

pub fn sanitize_features(x: &mut [f64]) {
    for v in x.iter_mut() {
        *v = if v.is_finite() {
            v.clamp(-MAX_FEATURE_ABS, MAX_FEATURE_ABS)
        } else {
            0.0
        };
    }
}

/// Repairs non-finite entries, caps magnitudes, floors the diagonal at `λ` and symmetrizes.
pub fn sanitize_covariance(a: &mut [f64], d: usize, lambda: f64) {
    let safe_lambda = lambda.max(MIN_LAMBDA);

    for i in 0..d {
        for j in 0..d {
            let idx = i * d + j;
            let val = a[idx];
            if !val.is_finite() {
                a[idx] = if i == j { safe_lambda } else { 0.0 };
            } else if val.abs() > MAX_COVARIANCE {
                a[idx] = val.signum() * MAX_COVARIANCE;
            }
        }
        let diag = i * d + i;
        if a[diag] < safe_lambda {
            a[diag] = safe_lambda;
        }
    }

    for i in 0..d {
        for j in (i + 1)..d {
            let avg = (a[i * d + j] + a[j * d + i]) / 2.0;
            a[i * d + j] = avg;
            a[j * d + i] = avg;
        }
    }
}

fn diagonal_range(l: &[f64], d: usize) -> Option<(f64, f64)> {
    let mut min_diag = f64::MAX;
    let mut max_diag = f64::MIN;
    for i in 0..d {
        let diag = l[i * d + i];
        if diag > 0.0 && diag.is_finite() {
            min_diag = min_diag.min(diag);
            max_diag = max_diag.max(diag);
        }
    }
    (min_diag <= max_diag).then_some((min_diag, max_diag))
}

pub fn needs_full_recompute(update_count: u64, l: &[f64], d: usize) -> bool {
    if update_count > 0 && update_count % FULL_RECOMPUTE_EVERY == 0 {
        return true;
    }

    let bad_diagonal = (0..d).any(|i| {
        let diag = l[i * d + i];
        !diag.is_finite() || diag < MIN_RANK1_DIAG
    });
    if bad_diagonal {
        return true;
    }

    match diagonal_range(l, d) {
        Some((min, max)) => max / min > MAX_CONDITION_ESTIMATE,
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub is_healthy: bool,
    pub has_nan: bool,
    pub has_inf: bool,
    pub condition_number: f64,
    pub min_diagonal: f64,
    pub max_diagonal: f64,
}

pub fn diagnose(a: &[f64], l: &[f64], d: usize) -> Diagnostic {
    let has_nan = a.iter().chain(l.iter()).any(|v| v.is_nan());
    let has_inf = a.iter().chain(l.iter()).any(|v| v.is_infinite());
    let (min_diagonal, max_diagonal) = diagonal_range(l, d).unwrap_or((0.0, 0.0));

    let condition_number = if min_diagonal > EPSILON {
        (max_diagonal / min_diagonal).powi(2)
    } else {
        f64::MAX
    };

    Diagnostic {
        is_healthy: !has_nan && !has_inf && condition_number < 1e12,
        has_nan,
        has_inf,
        condition_number,
        min_diagonal,
        max_diagonal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat_vec(a: &[f64], x: &[f64], d: usize) -> Vec<f64> {
        (0..d).map(|i| dot(&a[i * d..(i + 1) * d], x)).collect()
    }

    #[test]
    fn cholesky_of_identity_is_identity() {
        let a = identity_scaled(3, 1.0);
        let l = cholesky_decompose(&a, 3, 1.0);
        for i in 0..3 {
            assert!((l[i * 3 + i] - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn solve_cholesky_inverts_spd_system() {
        let a = vec![4.0, 1.0, 1.0, 3.0];
        let b = vec![1.0, 2.0];
        let l = cholesky_decompose(&a, 2, 1.0);
        let x = solve_cholesky(&l, &b, 2);
        let ax = mat_vec(&a, &x, 2);
        assert!((ax[0] - 1.0).abs() < 1e-9);
        assert!((ax[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rank1_update_matches_full_decomposition() {
        let d = 3;
        let mut a = identity_scaled(d, 1.0);
        let mut l = identity_scaled(d, 1.0);
        let x = vec![0.5, -0.25, 1.0];

        assert!(cholesky_rank1_update(&mut l, &x, d));
        rank1_add(&mut a, &x, d);
        let full = cholesky_decompose(&a, d, 1.0);

        for (lhs, rhs) in l.iter().zip(&full) {
            assert!((lhs - rhs).abs() < 1e-9, "{lhs} vs {rhs}");
        }
    }

    #[test]
    fn quadratic_form_of_identity_is_squared_norm() {
        let l = identity_scaled(2, 1.0);
        let q = quadratic_form(&l, &[3.0, 4.0], 2);
        assert!((q - 25.0).abs() < 1e-9);
    }

    #[test]
    fn sanitize_features_clamps_and_zeroes() {
        let mut x = vec![1.0, f64::NAN, 100.0, -100.0, f64::INFINITY];
        sanitize_features(&mut x);
        assert_eq!(x, vec![1.0, 0.0, MAX_FEATURE_ABS, -MAX_FEATURE_ABS, 0.0]);
    }

    #[test]
    fn sanitize_covariance_repairs_and_symmetrizes() {
        let mut a = vec![f64::NAN, 2.0, 0.0, 1e12];
        sanitize_covariance(&mut a, 2, 1.0);
        assert_eq!(a[0], 1.0);
        assert_eq!(a[1], a[2]);
        assert!(a[3] <= MAX_COVARIANCE);
        assert!(all_finite(&a));
    }

    #[test]
    fn recompute_triggers_on_schedule_and_bad_diagonal() {
        let l = identity_scaled(2, 1.0);
        assert!(!needs_full_recompute(0, &l, 2));
        assert!(!needs_full_recompute(7, &l, 2));
        assert!(needs_full_recompute(100, &l, 2));

        let broken = vec![f64::NAN, 0.0, 0.0, 1.0];
        assert!(needs_full_recompute(3, &broken, 2));
    }

    #[test]
    fn diagnose_flags_nan() {
        let a = vec![f64::NAN, 0.0, 0.0, 1.0];
        let l = identity_scaled(2, 1.0);
        let diag = diagnose(&a, &l, 2);
        assert!(diag.has_nan);
        assert!(!diag.is_healthy);
        assert!(diagnose(&identity_scaled(2, 1.0), &l, 2).is_healthy);
    }
}
