//! Gauss-Legendre quadrature rules on `[-1, 1]`.
//!
//! Rules are built with the Golub-Welsch algorithm: the nodes are the
//! eigenvalues of the symmetric tridiagonal Jacobi matrix of the Legendre
//! recurrence, and the weights come from the first component of each
//! eigenvector. Every node is then polished with a few Newton steps on
//! `P_n`, and the weight recomputed from `2 / ((1 - x²) P_n'(x)²)`, so the
//! tabulated rules are accurate to working precision.
//!
//! An `n`-point rule integrates polynomials of degree `2n - 1` exactly. B-spline
//! penalties only ever need `order - q` points per knot span; the closed-form
//! fallbacks use the configured point count.
//!
//! All rules up to [`MAX_GAUSS_LEGENDRE_POINTS`] are computed together the first
//! time any rule is requested and are read-only afterwards. The table is keyed
//! by point count alone, never by knots or other per-basis data, so it is safe
//! to share across threads.

use crate::basis::BasisError;
use std::sync::OnceLock;

/// Largest tabulated rule.
pub const MAX_GAUSS_LEGENDRE_POINTS: usize = 64;

const NEWTON_MAX_STEPS: usize = 8;

/// Nodes and weights of an `n`-point Gauss-Legendre rule on `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct GaussLegendreRule {
    /// Ascending nodes, symmetric about zero.
    nodes: Vec<f64>,
    /// Positive weights summing to 2.
    weights: Vec<f64>,
}

impl GaussLegendreRule {
    #[inline]
    pub fn points(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Nodes and weights affinely mapped onto `[a, b]`.
    pub fn mapped(&self, a: f64, b: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        let half_width = 0.5 * (b - a);
        let midpoint = 0.5 * (a + b);
        self.nodes
            .iter()
            .zip(self.weights.iter())
            .map(move |(&x, &w)| (midpoint + half_width * x, half_width * w))
    }

    /// Approximates `∫_a^b f(t) dt`.
    pub fn integrate<F: FnMut(f64) -> f64>(&self, a: f64, b: f64, mut f: F) -> f64 {
        self.mapped(a, b).map(|(t, w)| w * f(t)).sum()
    }
}

fn gauss_legendre_table() -> &'static [GaussLegendreRule] {
    static TABLE: OnceLock<Vec<GaussLegendreRule>> = OnceLock::new();
    TABLE.get_or_init(|| {
        log::debug!(
            "Building Gauss-Legendre table for 1..={} points",
            MAX_GAUSS_LEGENDRE_POINTS
        );
        (1..=MAX_GAUSS_LEGENDRE_POINTS)
            .map(compute_gauss_legendre)
            .collect()
    })
}

/// Returns the shared `points`-point rule.
pub fn gauss_legendre(points: usize) -> Result<&'static GaussLegendreRule, BasisError> {
    if points == 0 || points > MAX_GAUSS_LEGENDRE_POINTS {
        return Err(BasisError::InvalidParameters(format!(
            "Gauss-Legendre rules are available for 1..={MAX_GAUSS_LEGENDRE_POINTS} points, got {points}"
        )));
    }
    Ok(&gauss_legendre_table()[points - 1])
}

/// Golub-Welsch construction followed by Newton refinement.
///
/// For Legendre polynomials with weight 1 on `[-1, 1]`:
/// - Recurrence: (k+1) P_{k+1}(x) = (2k+1) x P_k(x) - k P_{k-1}(x)
/// - Jacobi matrix: diagonal = 0, off-diagonal[k-1] = k / sqrt(4k² - 1)
/// - μ₀ = ∫ 1 dx = 2
fn compute_gauss_legendre(n: usize) -> GaussLegendreRule {
    let mut diag = vec![0.0f64; n];
    let mut off_diag: Vec<f64> = (1..n)
        .map(|k| {
            let k = k as f64;
            k / (4.0 * k * k - 1.0).sqrt()
        })
        .collect();

    let (eigenvalues, first_components) = symmetric_tridiagonal_eigen(&mut diag, &mut off_diag);

    let mu0 = 2.0;
    let mut pairs: Vec<(f64, f64)> = eigenvalues
        .iter()
        .zip(first_components.iter())
        .map(|(&x, &v0)| (x, mu0 * v0 * v0))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    for (x, w) in pairs.iter_mut() {
        let mut node = *x;
        for _ in 0..NEWTON_MAX_STEPS {
            let (p, dp) = legendre_with_derivative(n, node);
            if dp == 0.0 {
                break;
            }
            let step = p / dp;
            node -= step;
            if step.abs() <= 1e-16 * node.abs().max(1.0) {
                break;
            }
        }
        let (_, dp) = legendre_with_derivative(n, node);
        let refined = 2.0 / ((1.0 - node * node) * dp * dp);
        if node.is_finite() && refined.is_finite() && refined > 0.0 {
            *x = node;
            *w = refined;
        }
    }

    // Enforce exact mirror symmetry.
    let mut nodes: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let mut weights: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    for i in 0..n / 2 {
        let j = n - 1 - i;
        let x = 0.5 * (nodes[j] - nodes[i]);
        let w = 0.5 * (weights[i] + weights[j]);
        nodes[i] = -x;
        nodes[j] = x;
        weights[i] = w;
        weights[j] = w;
    }
    if n % 2 == 1 {
        nodes[n / 2] = 0.0;
    }

    GaussLegendreRule { nodes, weights }
}

/// `(P_n(x), P_n'(x))` by the three-term recurrence.
fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut p_prev = 1.0;
    let mut p = x;
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 1..n {
        let k = k as f64;
        let p_next = ((2.0 * k + 1.0) * x * p - k * p_prev) / (k + 1.0);
        p_prev = p;
        p = p_next;
    }
    let dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
    (p, dp)
}

/// Symmetric tridiagonal eigenvalue decomposition using implicit QR with Wilkinson shifts.
///
/// Only the first component of each eigenvector is needed for the quadrature
/// weights, and each Givens rotation mixes that component independently of the
/// others, so just that row is tracked.
fn symmetric_tridiagonal_eigen(diag: &mut [f64], off_diag: &mut [f64]) -> (Vec<f64>, Vec<f64>) {
    let size = diag.len();
    let mut first = vec![0.0; size];
    if size > 0 {
        first[0] = 1.0;
    }

    let eps = 1e-15;
    let max_iter = 100;

    let mut n = size;
    while n > 1 {
        let mut converged = false;
        for _ in 0..max_iter {
            // Find the largest unreduced block
            let mut m = n - 1;
            while m > 0 {
                let scale = (diag[m - 1].abs() + diag[m].abs()).max(1.0);
                if off_diag[m - 1].abs() <= eps * scale {
                    off_diag[m - 1] = 0.0;
                    break;
                }
                m -= 1;
            }

            if m == n - 1 {
                n -= 1;
                converged = true;
                break;
            }

            let shift = wilkinson_shift(diag[n - 2], diag[n - 1], off_diag[n - 2]);

            let mut x = diag[m] - shift;
            let mut y = off_diag[m];

            for k in m..(n - 1) {
                let (c, s) = if y.abs() > eps {
                    let r = x.hypot(y);
                    if r > 0.0 && r.is_finite() {
                        (x / r, -y / r)
                    } else {
                        (1.0, 0.0)
                    }
                } else {
                    (1.0, 0.0)
                };

                if k > m {
                    off_diag[k - 1] = x.hypot(y);
                }

                let d1 = diag[k];
                let d2 = diag[k + 1];
                let e_k = off_diag[k];

                diag[k] = c * c * d1 + s * s * d2 - 2.0 * c * s * e_k;
                diag[k + 1] = s * s * d1 + c * c * d2 + 2.0 * c * s * e_k;
                off_diag[k] = c * s * (d1 - d2) + (c * c - s * s) * e_k;

                if k < n - 2 {
                    x = off_diag[k];
                    y = -s * off_diag[k + 1];
                    off_diag[k + 1] *= c;
                }

                let t = first[k];
                first[k] = c * t - s * first[k + 1];
                first[k + 1] = s * t + c * first[k + 1];
            }
        }
        if !converged {
            // Force trailing deflation; Newton refinement recovers the accuracy.
            off_diag[n - 2] = 0.0;
            n -= 1;
        }
    }

    (diag.to_vec(), first)
}

#[inline]
fn wilkinson_shift(a: f64, c: f64, b: f64) -> f64 {
    let d = (a - c) * 0.5;
    let t = d.hypot(b);
    let sgn = if d >= 0.0 { 1.0 } else { -1.0 }; // sign(0)=+1
    let denom = d + sgn * t;

    if denom.abs() > f64::EPSILON * t.max(1.0) {
        c - (b * b) / denom
    } else {
        c - t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rule_bounds_are_enforced() {
        assert!(matches!(
            gauss_legendre(0),
            Err(BasisError::InvalidParameters(_))
        ));
        assert!(matches!(
            gauss_legendre(MAX_GAUSS_LEGENDRE_POINTS + 1),
            Err(BasisError::InvalidParameters(_))
        ));
        assert_eq!(gauss_legendre(MAX_GAUSS_LEGENDRE_POINTS).unwrap().points(), 64);
    }

    #[test]
    fn test_single_point_rule_is_midpoint() {
        let rule = gauss_legendre(1).unwrap();
        assert_eq!(rule.nodes(), &[0.0]);
        assert_relative_eq!(rule.weights()[0], 2.0, epsilon = 1e-14);
    }

    #[test]
    fn test_matches_known_3_point_constants() {
        let rule = gauss_legendre(3).unwrap();
        let x = (3.0f64 / 5.0).sqrt();
        assert_relative_eq!(rule.nodes()[0], -x, epsilon = 1e-14);
        assert_relative_eq!(rule.nodes()[1], 0.0, epsilon = 1e-14);
        assert_relative_eq!(rule.nodes()[2], x, epsilon = 1e-14);
        assert_relative_eq!(rule.weights()[0], 5.0 / 9.0, epsilon = 1e-14);
        assert_relative_eq!(rule.weights()[1], 8.0 / 9.0, epsilon = 1e-14);
        assert_relative_eq!(rule.weights()[2], 5.0 / 9.0, epsilon = 1e-14);
    }

    #[test]
    fn test_weights_sum_to_two_and_nodes_are_symmetric() {
        for n in [2usize, 5, 8, 17, 32, 64] {
            let rule = gauss_legendre(n).unwrap();
            let sum: f64 = rule.weights().iter().sum();
            assert_relative_eq!(sum, 2.0, epsilon = 1e-12);
            for i in 0..n / 2 {
                assert_eq!(rule.nodes()[i], -rule.nodes()[n - 1 - i]);
                assert_eq!(rule.weights()[i], rule.weights()[n - 1 - i]);
            }
            assert!(rule.nodes().windows(2).all(|w| w[0] < w[1]));
            assert!(rule.nodes().iter().all(|x| x.abs() < 1.0));
        }
    }

    #[test]
    fn test_moment_exactness_up_to_degree_2n_minus_1() {
        for n in [1usize, 2, 4, 7, 12] {
            let rule = gauss_legendre(n).unwrap();
            for degree in 0..(2 * n) {
                let approx: f64 = rule
                    .nodes()
                    .iter()
                    .zip(rule.weights())
                    .map(|(&x, &w)| w * x.powi(degree as i32))
                    .sum();
                let expected = if degree % 2 == 1 {
                    0.0
                } else {
                    2.0 / (degree as f64 + 1.0)
                };
                assert!(
                    (approx - expected).abs() <= 1e-13,
                    "n={} degree={} approx={} expected={}",
                    n,
                    degree,
                    approx,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_integrate_on_mapped_interval() {
        let rule = gauss_legendre(10).unwrap();
        let value = rule.integrate(0.0, std::f64::consts::PI, f64::sin);
        assert_relative_eq!(value, 2.0, epsilon = 1e-12);

        let cubic = gauss_legendre(2).unwrap().integrate(1.0, 3.0, |t| t * t * t);
        assert_relative_eq!(cubic, (81.0 - 1.0) / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wilkinson_shift_finite_when_d_is_zero() {
        let shift = wilkinson_shift(0.0, 0.0, 1.25);
        assert!(shift.is_finite());
        assert_relative_eq!(shift, -1.25, epsilon = 1e-14);
    }
}
