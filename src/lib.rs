//! Newton–Raphson solver for discretized nonlinear problems with Dirichlet constraints.
//!
//! The driver in [`newton`] repeatedly assembles the residual and Jacobian of a problem through
//! an [`Assembler`], lifts prescribed degrees of freedom out of the linear system with a
//! [`ConstraintApplicator`] and solves for the correction with a [`LinearSolver`]. The crate also
//! ships a handful of concrete collaborators: closure-based assemblers, dense direct solvers and
//! a small nonlinear Poisson model on a uniform interval mesh.
pub mod assembly;
pub mod calculus;
pub mod constraints;
pub mod mesh;
pub mod newton;
pub mod poisson;
pub mod quadrature;
pub mod solvers;

pub mod lifting {
    pub use newton_fem_sparse::lifting::*;
}

pub use newton_fem_traits::{Assembler, ConstraintApplicator, LinearSolver, Real};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
