use crate::basis::{BasisError, BasisFamily, fill_design_matrix};
use crate::domain::Domain;
use crate::penalty::{PenaltyOptions, ensure_finite, mirror_upper_triangle};
use crate::quadrature::gauss_legendre;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array1, Array2, ArrayView1};

/// B-spline basis of a given `order` (degree + 1) over a non-decreasing knot vector.
///
/// The basis has `knots.len() - order` functions and is supported on the knot
/// span `[knots[order - 1], knots[basis_size]]`, which must contain the domain.
/// Evaluation outside that span fails with [`BasisError::OutOfDomain`]; the
/// upper end is inclusive and is evaluated on the last non-degenerate knot
/// interval.
///
/// Derivatives up to `order - 1` are available. The `(order - 1)`-th derivative
/// is piecewise constant and is taken from the right at interior knots.
#[derive(Debug, Clone, PartialEq)]
pub struct BSplineBasis {
    domain: Domain,
    order: usize,
    knots: Array1<f64>,
}

/// Reusable buffers for local evaluation at one point.
#[derive(Clone, Debug)]
pub(crate) struct BsplineScratch {
    left: Vec<f64>,
    right: Vec<f64>,
    current: Vec<f64>,
    next: Vec<f64>,
}

impl BsplineScratch {
    pub(crate) fn new(order: usize) -> Self {
        let len = order + 1;
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
            current: vec![0.0; len],
            next: vec![0.0; len],
        }
    }
}

impl BSplineBasis {
    pub fn new(domain: Domain, order: usize, knots: Array1<f64>) -> Result<Self, BasisError> {
        validate_knots_for_order(knots.view(), order)?;
        let basis_size = knots.len() - order;
        let (span_lower, span_upper) = (knots[order - 1], knots[basis_size]);
        if !(span_lower < span_upper) {
            return Err(BasisError::InvalidParameters(format!(
                "knot span [{span_lower}, {span_upper}] is empty"
            )));
        }
        if domain.lower() < span_lower || domain.upper() > span_upper {
            return Err(BasisError::InvalidParameters(format!(
                "domain [{}, {}] is not covered by the knot span [{span_lower}, {span_upper}]",
                domain.lower(),
                domain.upper()
            )));
        }
        Ok(Self {
            domain,
            order,
            knots,
        })
    }

    /// Clamped knots: `basis_size - order` equally spaced interior knots, each
    /// domain bound repeated `order` times.
    pub fn with_uniform_knots(
        domain: Domain,
        order: usize,
        basis_size: usize,
    ) -> Result<Self, BasisError> {
        if order == 0 {
            return Err(BasisError::InvalidParameters(
                "B-spline order must be at least 1".to_string(),
            ));
        }
        if basis_size < order {
            return Err(BasisError::InvalidParameters(format!(
                "a uniform B-spline basis of order {order} needs at least {order} functions, got {basis_size}"
            )));
        }
        let num_interior = basis_size - order;
        let breakpoints = Array1::linspace(domain.lower(), domain.upper(), num_interior + 2);

        let mut knots = Vec::with_capacity(basis_size + order);
        knots.extend(std::iter::repeat_n(domain.lower(), order - 1));
        knots.extend(breakpoints.iter().copied());
        knots.extend(std::iter::repeat_n(domain.upper(), order - 1));

        Self::new(domain, order, Array1::from_vec(knots))
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn degree(&self) -> usize {
        self.order - 1
    }

    pub fn knots(&self) -> ArrayView1<'_, f64> {
        self.knots.view()
    }

    /// `[knots[order - 1], knots[basis_size]]`, the interval on which the basis is defined.
    pub fn knot_span(&self) -> (f64, f64) {
        (self.knots[self.order - 1], self.knots[self.basis_size()])
    }

    /// Greville abscissae: the average of the `order - 1` knots interior to
    /// each function's support (the support midpoint for order 1).
    pub fn greville_abscissae(&self) -> Array1<f64> {
        let degree = self.degree();
        Array1::from_shape_fn(self.basis_size(), |i| {
            if degree == 0 {
                0.5 * (self.knots[i] + self.knots[i + 1])
            } else {
                self.knots.slice(ndarray::s![i + 1..=i + degree]).sum() / degree as f64
            }
        })
    }

    fn check_point(&self, t: f64) -> Result<(), BasisError> {
        let (lower, upper) = self.knot_span();
        if lower <= t && t <= upper {
            Ok(())
        } else {
            Err(BasisError::OutOfDomain {
                point: t,
                lower,
                upper,
            })
        }
    }

    /// Index `mu` with `knots[mu] <= t < knots[mu + 1]` and `order - 1 <= mu < basis_size`.
    /// At the upper end of the knot span the last non-degenerate interval is used.
    /// `t` must already lie in the knot span.
    fn locate_span(&self, t: f64) -> usize {
        let basis_size = self.basis_size();
        let upper = self.knots[basis_size];
        if t >= upper {
            let mut mu = basis_size - 1;
            while self.knots[mu] >= upper {
                mu -= 1;
            }
            return mu;
        }
        let knots = self
            .knots
            .as_slice()
            .expect("knot vector should be contiguous");
        let count_le = knots.partition_point(|&k| k <= t);
        count_le
            .saturating_sub(1)
            .clamp(self.order - 1, basis_size - 1)
    }

    /// Values of the `sub_order` B-splines that are non-zero on span `mu`,
    /// `N_{mu - sub_order + 1}, ..., N_{mu}`, written to `scratch.current`.
    ///
    /// Cox-de Boor recursion in the triangular form of Algorithm A2.2 from
    /// "The NURBS Book" (Piegl and Tiller).
    fn local_basis(&self, t: f64, mu: usize, sub_order: usize, scratch: &mut BsplineScratch) {
        let knots = &self.knots;
        let left = &mut scratch.left;
        let right = &mut scratch.right;
        let n = &mut scratch.current;

        n[0] = 1.0;
        for d in 1..sub_order {
            left[d] = t - knots[mu + 1 - d];
            right[d] = knots[mu + d] - t;

            let mut saved = 0.0;
            for r in 0..d {
                let den = right[r + 1] + left[d - r];
                let temp = if den != 0.0 { n[r] / den } else { 0.0 };
                n[r] = saved + right[r + 1] * temp;
                saved = left[d - r] * temp;
            }
            n[d] = saved;
        }
    }

    /// `derivative_order`-th derivatives of the `order` functions non-zero on span `mu`,
    /// left in `scratch.current[..order]`. Returns the global index of the first one.
    ///
    /// Starts from the order-`(k - d)` values and raises the order `d` times with
    /// `D B_{i,m} = (m - 1) [D B_{i,m-1} / (t_{i+m-1} - t_i) - D B_{i+1,m-1} / (t_{i+m} - t_{i+1})]`.
    fn local_derivatives(
        &self,
        t: f64,
        mu: usize,
        derivative_order: usize,
        scratch: &mut BsplineScratch,
    ) -> usize {
        let knots = &self.knots;
        let lowest = self.order - derivative_order;
        self.local_basis(t, mu, lowest, scratch);

        for m in (lowest + 1)..=self.order {
            let scale = (m - 1) as f64;
            for j in 0..m {
                let i = mu + 1 + j - m;
                let left = if j >= 1 {
                    let den = knots[i + m - 1] - knots[i];
                    if den != 0.0 {
                        scratch.current[j - 1] / den
                    } else {
                        0.0
                    }
                } else {
                    0.0
                };
                let right = if j + 1 < m {
                    let den = knots[i + m] - knots[i + 1];
                    if den != 0.0 {
                        scratch.current[j] / den
                    } else {
                        0.0
                    }
                } else {
                    0.0
                };
                scratch.next[j] = scale * (left - right);
            }
            std::mem::swap(&mut scratch.current, &mut scratch.next);
        }

        mu + 1 - self.order
    }

    fn check_points(&self, points: ArrayView1<f64>) -> Result<(), BasisError> {
        points.iter().try_for_each(|&t| self.check_point(t))
    }

    /// Sparse `points.len() x basis_size` design matrix holding only the at most
    /// `order` locally non-zero entries per row.
    pub fn evaluate_sparse(
        &self,
        points: ArrayView1<f64>,
        derivative_order: usize,
    ) -> Result<SparseColMat<usize, f64>, BasisError> {
        self.check_derivative_order(derivative_order)?;
        self.check_points(points)?;

        let mut scratch = BsplineScratch::new(self.order);
        let mut triplets = Vec::with_capacity(points.len().saturating_mul(self.order));
        for (row, &t) in points.iter().enumerate() {
            let mu = self.locate_span(t);
            let start = self.local_derivatives(t, mu, derivative_order, &mut scratch);
            for offset in 0..self.order {
                triplets.push(Triplet::new(row, start + offset, scratch.current[offset]));
            }
        }

        SparseColMat::try_new_from_triplets(points.len(), self.basis_size(), &triplets)
            .map_err(|err| BasisError::SparseAssembly(format!("{err:?}")))
    }
}

fn validate_knots_for_order(knots: ArrayView1<f64>, order: usize) -> Result<(), BasisError> {
    if order == 0 {
        return Err(BasisError::InvalidParameters(
            "B-spline order must be at least 1".to_string(),
        ));
    }
    let required = order + 1;
    if knots.len() < required {
        return Err(BasisError::InvalidParameters(format!(
            "an order-{order} B-spline basis needs at least {required} knots, got {}",
            knots.len()
        )));
    }
    if knots.iter().any(|k| !k.is_finite()) {
        return Err(BasisError::InvalidParameters(
            "knot vector contains non-finite (NaN or Infinity) values".to_string(),
        ));
    }
    if knots.windows(2).into_iter().any(|w| w[0] > w[1]) {
        return Err(BasisError::InvalidParameters(
            "knot vector is not non-decreasing".to_string(),
        ));
    }
    // A knot repeated more than `order` times gives an identically zero function.
    let mut run = 1;
    for i in 1..knots.len() {
        if knots[i] == knots[i - 1] {
            run += 1;
            if run > order {
                return Err(BasisError::InvalidParameters(format!(
                    "knot {} has multiplicity greater than the order {order}",
                    knots[i]
                )));
            }
        } else {
            run = 1;
        }
    }
    Ok(())
}

impl BasisFamily for BSplineBasis {
    fn family_name(&self) -> &'static str {
        "bspline"
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn basis_size(&self) -> usize {
        self.knots.len() - self.order
    }

    fn max_derivative_order(&self) -> usize {
        self.order - 1
    }

    fn evaluate(
        &self,
        points: ArrayView1<f64>,
        derivative_order: usize,
    ) -> Result<Array2<f64>, BasisError> {
        self.check_derivative_order(derivative_order)?;
        self.check_points(points)?;
        Ok(fill_design_matrix(
            points,
            self.basis_size(),
            || BsplineScratch::new(self.order),
            |scratch, t, row| {
                let mu = self.locate_span(t);
                let start = self.local_derivatives(t, mu, derivative_order, scratch);
                row[start..start + self.order].copy_from_slice(&scratch.current[..self.order]);
            },
        ))
    }

    /// Span-by-span Gauss-Legendre quadrature over the domain.
    ///
    /// On each knot interval the integrand is a polynomial of degree at most
    /// `2 (order - 1 - q)`, so `order - q` nodes integrate it exactly; the
    /// options only matter for the closed-form families. Only the `order`
    /// functions alive on a span contribute there, and only the upper triangle
    /// is accumulated.
    fn penalty_matrix_with(
        &self,
        derivative_order: usize,
        _options: &PenaltyOptions,
    ) -> Result<Array2<f64>, BasisError> {
        self.check_derivative_order(derivative_order)?;
        let rule = gauss_legendre(self.order - derivative_order)?;
        let basis_size = self.basis_size();
        let (lower, upper) = (self.domain.lower(), self.domain.upper());

        let mut gram = Array2::<f64>::zeros((basis_size, basis_size));
        let mut scratch = BsplineScratch::new(self.order);
        for mu in (self.order - 1)..basis_size {
            let a = self.knots[mu].max(lower);
            let b = self.knots[mu + 1].min(upper);
            if b <= a {
                continue;
            }
            for (t, w) in rule.mapped(a, b) {
                let start = self.local_derivatives(t, mu, derivative_order, &mut scratch);
                let values = &scratch.current[..self.order];
                for r in 0..self.order {
                    let weighted = w * values[r];
                    if weighted == 0.0 {
                        continue;
                    }
                    for c in r..self.order {
                        gram[[start + r, start + c]] += weighted * values[c];
                    }
                }
            }
        }
        mirror_upper_triangle(&mut gram);
        ensure_finite(&gram, "B-spline penalty matrix")?;
        Ok(gram)
    }
}
