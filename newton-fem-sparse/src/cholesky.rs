use nalgebra::{DMatrix, DVectorView, DVectorViewMut};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use newton_fem_traits::{LinearSolver, Real};
use std::error::Error;

/// Direct solver based on a sparse Cholesky factorization.
///
/// The matrix must be symmetric positive definite. It is converted to CSC storage and factored
/// from scratch on every solve, since the values of a Newton Jacobian change every iteration.
#[derive(Copy, Clone, Debug, Default)]
pub struct SparseCholesky;

impl<T: Real> LinearSolver<T, CsrMatrix<T>> for SparseCholesky {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<T>,
        rhs: DVectorView<T>,
        mut solution: DVectorViewMut<T>,
    ) -> Result<(), Box<dyn Error>> {
        let csc = CscMatrix::from(matrix);
        let factorization = CscCholesky::factor(&csc)
            .map_err(|err| Box::<dyn Error>::from(format!("Sparse Cholesky factorization failed: {:?}", err)))?;

        let b = DMatrix::from_iterator(rhs.len(), 1, rhs.iter().copied());
        let x = factorization.solve(&b);
        if x.iter().any(|x_i| !x_i.is_finite()) {
            return Err(Box::from("Sparse Cholesky solve produced non-finite values."));
        }
        solution.copy_from(&x.column(0));
        Ok(())
    }
}
