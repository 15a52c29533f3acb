use crate::domain::Domain;
use crate::families::{BSplineBasis, ExponentialBasis, FourierBasis, MonomialBasis};
use crate::penalty::{PenaltyMatrixComputer, PenaltyOptions};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView1, Axis};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::OnceLock;
use thiserror::Error;

/// Evaluation batches at or above this many matrix entries are filled in parallel.
const PARALLEL_EVALUATION_MIN_ENTRIES: usize = 1 << 16;

fn evaluation_thread_pool() -> &'static ThreadPool {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .build()
            .expect("basis evaluation thread pool initialization should succeed")
    })
}

/// Every failure a basis system can report.
///
/// Errors are local to the call that produced them: a failed evaluation never
/// invalidates the basis instance, and construction never yields a partially
/// built one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error("Invalid basis parameters: {0}")]
    InvalidParameters(String),

    #[error(
        "Derivative order {order} is not supported by this basis; the maximum supported order is {max}."
    )]
    InvalidDerivativeOrder { order: usize, max: usize },

    #[error("Evaluation point {point} lies outside the supported interval [{lower}, {upper}].")]
    OutOfDomain { point: f64, lower: f64, upper: f64 },

    #[error("Numerical instability detected: {0}")]
    NumericalInstability(String),

    #[error("Failed to assemble sparse design matrix: {0}")]
    SparseAssembly(String),
}

/// Capability set shared by every univariate basis family.
///
/// Implementations are immutable after construction; all methods are pure, so a
/// basis can be evaluated from many threads at once.
pub trait BasisFamily: Send + Sync {
    /// Short, stable family name used in log messages.
    fn family_name(&self) -> &'static str;

    fn domain(&self) -> &Domain;

    /// Number of basis functions, always at least one.
    fn basis_size(&self) -> usize;

    /// Highest derivative order accepted by [`BasisFamily::evaluate`] and the penalty computations.
    fn max_derivative_order(&self) -> usize;

    /// Values of the `derivative_order`-th derivative of every basis function at
    /// every point, as a `points.len() x basis_size` matrix.
    fn evaluate(
        &self,
        points: ArrayView1<f64>,
        derivative_order: usize,
    ) -> Result<Array2<f64>, BasisError>;

    /// Family-specific kernel for `R[i, j] = ∫ B_i^(q)(t) B_j^(q)(t) dt` over the domain.
    ///
    /// Callers normally go through [`PenaltyMatrixComputer`], which also checks
    /// the options and the resulting Gram matrix.
    fn penalty_matrix_with(
        &self,
        derivative_order: usize,
        options: &PenaltyOptions,
    ) -> Result<Array2<f64>, BasisError>;

    /// Penalty matrix computed with default [`PenaltyOptions`].
    fn penalty_matrix(&self, derivative_order: usize) -> Result<Array2<f64>, BasisError> {
        PenaltyMatrixComputer::default().compute(self, derivative_order)
    }

    fn check_derivative_order(&self, derivative_order: usize) -> Result<(), BasisError> {
        let max = self.max_derivative_order();
        if derivative_order > max {
            return Err(BasisError::InvalidDerivativeOrder {
                order: derivative_order,
                max,
            });
        }
        Ok(())
    }
}

/// A basis system of any supported family, selected at construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum Basis {
    Monomial(MonomialBasis),
    Exponential(ExponentialBasis),
    Fourier(FourierBasis),
    BSpline(BSplineBasis),
}

impl Basis {
    fn as_family(&self) -> &dyn BasisFamily {
        match self {
            Basis::Monomial(basis) => basis,
            Basis::Exponential(basis) => basis,
            Basis::Fourier(basis) => basis,
            Basis::BSpline(basis) => basis,
        }
    }
}

impl BasisFamily for Basis {
    fn family_name(&self) -> &'static str {
        self.as_family().family_name()
    }

    fn domain(&self) -> &Domain {
        self.as_family().domain()
    }

    fn basis_size(&self) -> usize {
        self.as_family().basis_size()
    }

    fn max_derivative_order(&self) -> usize {
        self.as_family().max_derivative_order()
    }

    fn evaluate(
        &self,
        points: ArrayView1<f64>,
        derivative_order: usize,
    ) -> Result<Array2<f64>, BasisError> {
        self.as_family().evaluate(points, derivative_order)
    }

    fn penalty_matrix_with(
        &self,
        derivative_order: usize,
        options: &PenaltyOptions,
    ) -> Result<Array2<f64>, BasisError> {
        self.as_family()
            .penalty_matrix_with(derivative_order, options)
    }
}

impl From<MonomialBasis> for Basis {
    fn from(basis: MonomialBasis) -> Self {
        Basis::Monomial(basis)
    }
}

impl From<ExponentialBasis> for Basis {
    fn from(basis: ExponentialBasis) -> Self {
        Basis::Exponential(basis)
    }
}

impl From<FourierBasis> for Basis {
    fn from(basis: FourierBasis) -> Self {
        Basis::Fourier(basis)
    }
}

impl From<BSplineBasis> for Basis {
    fn from(basis: BSplineBasis) -> Self {
        Basis::BSpline(basis)
    }
}

/// Converts a derivative order into the `i32` exponent used with `powi`.
pub(crate) fn derivative_exponent(derivative_order: usize) -> Result<i32, BasisError> {
    i32::try_from(derivative_order).map_err(|_| BasisError::InvalidDerivativeOrder {
        order: derivative_order,
        max: i32::MAX as usize,
    })
}

fn should_evaluate_in_parallel(num_points: usize, num_basis: usize) -> bool {
    num_points > 1 && num_points.saturating_mul(num_basis) >= PARALLEL_EVALUATION_MIN_ENTRIES
}

/// Allocates a `points.len() x num_basis` design matrix and fills each row with
/// `fill_row(scratch, t, row)`. Rows start zeroed; large batches run on the
/// evaluation pool with one scratch value per worker.
pub(crate) fn fill_design_matrix<S, I, F>(
    points: ArrayView1<f64>,
    num_basis: usize,
    init_scratch: I,
    fill_row: F,
) -> Array2<f64>
where
    S: Send,
    I: Fn() -> S + Send + Sync,
    F: Fn(&mut S, f64, &mut [f64]) + Send + Sync,
{
    let mut design = Array2::<f64>::zeros((points.len(), num_basis));

    if let (true, Some(point_slice)) = (
        should_evaluate_in_parallel(points.len(), num_basis),
        points.as_slice(),
    ) {
        evaluation_thread_pool().install(|| {
            design
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(point_slice.par_iter().copied())
                .for_each_init(&init_scratch, |scratch, (mut row, t)| {
                    let row_slice = row
                        .as_slice_mut()
                        .expect("design matrix rows should be contiguous");
                    fill_row(scratch, t, row_slice);
                });
        });
    } else {
        let mut scratch = init_scratch();
        for (mut row, &t) in design.axis_iter_mut(Axis(0)).zip(points.iter()) {
            let row_slice = row
                .as_slice_mut()
                .expect("design matrix rows should be contiguous");
            fill_row(&mut scratch, t, row_slice);
        }
    }

    design
}
