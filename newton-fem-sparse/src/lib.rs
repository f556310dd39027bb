//! Linear algebra backends for the Newton correction step.
//!
//! Contains the Dirichlet lifting used to constrain assembled Jacobian systems, a preconditioned
//! Conjugate-Gradient solver and a sparse Cholesky solver, all exposed through the traits in
//! `newton-fem-traits`.

/// Preconditioned Conjugate-Gradient.
pub mod cg;
/// Direct sparse solvers.
pub mod cholesky;
/// Symmetric enforcement of homogeneous Dirichlet conditions.
pub mod lifting;

pub use nalgebra_sparse;
pub use nalgebra_sparse::CsrMatrix;
