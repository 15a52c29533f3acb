#![deny(dead_code)]
#![deny(unused_imports)]

//! Univariate basis-function systems for functional data analysis.
//!
//! Each family evaluates its functions and their derivatives on a batch of
//! points and builds the roughness penalty `R[i, j] = ∫ B_i^(q) B_j^(q)` over
//! its domain.

pub mod basis;
pub mod domain;
pub mod families;
pub mod penalty;
pub mod quadrature;
pub mod types;

pub use basis::{Basis, BasisError, BasisFamily};
pub use domain::Domain;
pub use families::{BSplineBasis, ExponentialBasis, FourierBasis, MonomialBasis};
pub use penalty::{PenaltyMatrixComputer, PenaltyOptions};
pub use quadrature::{GaussLegendreRule, MAX_GAUSS_LEGENDRE_POINTS, gauss_legendre};
pub use types::{BSplineKnotSpec, BasisSpec, build_basis};
