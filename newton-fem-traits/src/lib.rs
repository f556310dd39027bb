//! Core traits shared by the `newton-fem` crates.
//!
//! The Newton driver in `newton-fem` only talks to its collaborators through the traits defined
//! here: an [`Assembler`] that evaluates the residual and its Jacobian, a [`LinearSolver`] for the
//! correction step and a [`ConstraintApplicator`] that enforces Dirichlet conditions on the
//! assembled linear system.
use nalgebra::{DVectorView, DVectorViewMut, RealField, Scalar};
use std::error::Error;

pub use nalgebra;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Evaluates the residual $R(u)$ of a discretized nonlinear problem and its Jacobian
/// $J(u) = \partial R / \partial u$.
///
/// Both assembly routines must only depend on the field passed in, so that repeated calls with
/// the same field produce the same output.
pub trait Assembler<T: Scalar> {
    /// The storage used for the Jacobian matrix.
    type Matrix;

    /// The number of degrees of freedom of the discrete field.
    fn num_dofs(&self) -> usize;

    /// Allocates a Jacobian matrix with the structure needed by
    /// [`assemble_jacobian_into`](Self::assemble_jacobian_into).
    fn create_jacobian(&self) -> Self::Matrix;

    fn assemble_residual_into(&mut self, residual: DVectorViewMut<T>, field: DVectorView<T>) -> eyre::Result<()>;

    /// Overwrites the contents of `jacobian` with the Jacobian evaluated at `field`.
    fn assemble_jacobian_into(&mut self, jacobian: &mut Self::Matrix, field: DVectorView<T>) -> eyre::Result<()>;
}

impl<T, A> Assembler<T> for &mut A
where
    T: Scalar,
    A: ?Sized + Assembler<T>,
{
    type Matrix = A::Matrix;

    fn num_dofs(&self) -> usize {
        A::num_dofs(self)
    }

    fn create_jacobian(&self) -> Self::Matrix {
        A::create_jacobian(self)
    }

    fn assemble_residual_into(&mut self, residual: DVectorViewMut<T>, field: DVectorView<T>) -> eyre::Result<()> {
        A::assemble_residual_into(self, residual, field)
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut Self::Matrix, field: DVectorView<T>) -> eyre::Result<()> {
        A::assemble_jacobian_into(self, jacobian, field)
    }
}

/// Solves linear systems $A x = b$ for matrices of type `M`.
///
/// Implementations must return an error rather than an undefined solution when the system
/// cannot be solved to the solver's internal tolerance.
pub trait LinearSolver<T: Scalar, M: ?Sized> {
    fn solve(&mut self, matrix: &M, rhs: DVectorView<T>, solution: DVectorViewMut<T>) -> Result<(), Box<dyn Error>>;
}

impl<T, M, S> LinearSolver<T, M> for &mut S
where
    T: Scalar,
    M: ?Sized,
    S: ?Sized + LinearSolver<T, M>,
{
    fn solve(&mut self, matrix: &M, rhs: DVectorView<T>, solution: DVectorViewMut<T>) -> Result<(), Box<dyn Error>> {
        S::solve(self, matrix, rhs, solution)
    }
}

/// Enforces homogeneous Dirichlet conditions on an assembled system $J \Delta u = b$.
///
/// After application, solving the system must produce a zero increment at every constrained
/// degree of freedom, regardless of the remaining entries. Symmetric input must stay symmetric.
pub trait ConstraintApplicator<T: Scalar, M: ?Sized> {
    /// Applies the constraints. `constrained_dofs` is sorted and free of duplicates.
    fn apply(&mut self, matrix: &mut M, rhs: DVectorViewMut<T>, constrained_dofs: &[usize]);
}

impl<T, M, C> ConstraintApplicator<T, M> for &mut C
where
    T: Scalar,
    M: ?Sized,
    C: ?Sized + ConstraintApplicator<T, M>,
{
    fn apply(&mut self, matrix: &mut M, rhs: DVectorViewMut<T>, constrained_dofs: &[usize]) {
        C::apply(self, matrix, rhs, constrained_dofs)
    }
}
