//! Dense direct solvers for the Newton correction step.
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use newton_fem_traits::{LinearSolver, Real};
use std::error::Error;

pub use newton_fem_sparse::cg::{ConjugateGradient, Preconditioning, RelativeResidualCriterion};
pub use newton_fem_sparse::cholesky::SparseCholesky;

/// LU decomposition with partial pivoting.
///
/// Works for non-symmetric Jacobians. Sparse matrices are converted to dense storage, which is
/// only reasonable for small problems.
#[derive(Copy, Clone, Debug, Default)]
pub struct DenseLu;

impl<T: Real> LinearSolver<T, DMatrix<T>> for DenseLu {
    fn solve(
        &mut self,
        matrix: &DMatrix<T>,
        rhs: DVectorView<T>,
        mut solution: DVectorViewMut<T>,
    ) -> Result<(), Box<dyn Error>> {
        let x = matrix
            .clone()
            .lu()
            .solve(&rhs)
            .ok_or_else(|| Box::<dyn Error>::from("Jacobian is singular, LU solve failed."))?;
        check_finite(&x)?;
        solution.copy_from(&x);
        Ok(())
    }
}

impl<T: Real> LinearSolver<T, CsrMatrix<T>> for DenseLu {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<T>,
        rhs: DVectorView<T>,
        solution: DVectorViewMut<T>,
    ) -> Result<(), Box<dyn Error>> {
        let dense = DMatrix::from(matrix);
        <Self as LinearSolver<T, DMatrix<T>>>::solve(self, &dense, rhs, solution)
    }
}

/// Cholesky decomposition, for symmetric positive definite Jacobians.
#[derive(Copy, Clone, Debug, Default)]
pub struct DenseCholesky;

impl<T: Real> LinearSolver<T, DMatrix<T>> for DenseCholesky {
    fn solve(
        &mut self,
        matrix: &DMatrix<T>,
        rhs: DVectorView<T>,
        mut solution: DVectorViewMut<T>,
    ) -> Result<(), Box<dyn Error>> {
        let cholesky = matrix
            .clone()
            .cholesky()
            .ok_or_else(|| Box::<dyn Error>::from("Jacobian is not positive definite, Cholesky failed."))?;
        let x = cholesky.solve(&rhs);
        check_finite(&x)?;
        solution.copy_from(&x);
        Ok(())
    }
}

fn check_finite<T: Real>(x: &DVector<T>) -> Result<(), Box<dyn Error>> {
    if x.iter().all(|x_i| x_i.is_finite()) {
        Ok(())
    } else {
        Err(Box::from("Linear solve produced non-finite values."))
    }
}
