use nalgebra::{DMatrix, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use newton_fem_traits::{ConstraintApplicator, Real};

/// Eliminates constrained degrees of freedom symmetrically.
///
/// Rows and columns of constrained degrees of freedom are zeroed, their diagonal entries
/// are replaced by a representative scale of the matrix and the corresponding entries of the
/// right-hand side are set to zero. The solution of the lifted system therefore has a zero
/// increment at every constrained degree of freedom.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SymmetricLifting;

impl<T: Real> ConstraintApplicator<T, DMatrix<T>> for SymmetricLifting {
    fn apply(&mut self, matrix: &mut DMatrix<T>, rhs: DVectorViewMut<T>, constrained_dofs: &[usize]) {
        apply_lifting_dense(matrix, rhs, constrained_dofs);
    }
}

impl<T: Real> ConstraintApplicator<T, CsrMatrix<T>> for SymmetricLifting {
    fn apply(&mut self, matrix: &mut CsrMatrix<T>, rhs: DVectorViewMut<T>, constrained_dofs: &[usize]) {
        apply_lifting_csr(matrix, rhs, constrained_dofs);
    }
}

/// Applies homogeneous Dirichlet conditions to a dense system.
///
/// The constrained diagonal entries are set to the mean absolute value of the diagonal, or to one
/// if the diagonal is zero.
///
/// # Panics
///
/// Panics if the matrix is not square, or if a constrained index is out of bounds.
pub fn apply_lifting_dense<'a, T>(
    matrix: &mut DMatrix<T>,
    rhs: impl Into<DVectorViewMut<'a, T>>,
    constrained_dofs: &[usize],
) where
    T: Real,
{
    let mut rhs = rhs.into();
    assert_eq!(matrix.nrows(), matrix.ncols(), "Matrix must be square");
    assert_eq!(matrix.nrows(), rhs.len(), "Matrix and right-hand side dimensions must agree");

    if constrained_dofs.is_empty() {
        return;
    }

    let n = T::from_usize(matrix.nrows()).expect("Dimension must fit in T");
    let mean_diagonal = matrix.diagonal().iter().fold(T::zero(), |sum, d| sum + d.abs()) / n;
    let scale = if mean_diagonal > T::zero() {
        mean_diagonal
    } else {
        T::one()
    };

    for &dof in constrained_dofs {
        matrix.column_mut(dof).fill(T::zero());
        matrix.row_mut(dof).fill(T::zero());
        matrix[(dof, dof)] = scale;
        rhs[dof] = T::zero();
    }
}

/// Applies homogeneous Dirichlet conditions to a CSR system.
///
/// Uses the same diagonal scale as [`apply_lifting_dense`]. A constrained row without a stored
/// diagonal entry is left all zero, so the pattern should contain the diagonal.
///
/// The sparsity pattern must be structurally symmetric (which is always the case for matrices
/// assembled from finite element connectivity). This lets us find every column entry that
/// must be zeroed by only visiting the rows that appear in the constrained rows, instead of
/// scanning the full matrix. The pattern itself is left untouched, explicit zeros remain.
///
/// # Panics
///
/// Panics if the matrix is not square, or if a constrained index is out of bounds.
pub fn apply_lifting_csr<'a, T>(
    matrix: &mut CsrMatrix<T>,
    rhs: impl Into<DVectorViewMut<'a, T>>,
    constrained_dofs: &[usize],
) where
    T: Real,
{
    let mut rhs = rhs.into();
    assert_eq!(matrix.nrows(), matrix.ncols(), "Matrix must be square");
    assert_eq!(matrix.nrows(), rhs.len(), "Matrix and right-hand side dimensions must agree");

    if constrained_dofs.is_empty() {
        return;
    }

    let n = T::from_usize(matrix.nrows()).expect("Dimension must fit in T");
    let mean_diagonal = matrix
        .row_iter()
        .enumerate()
        .filter_map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .find(|(j, _)| **j == i)
                .map(|(_, &v)| v.abs())
        })
        .fold(T::zero(), |sum, d| sum + d)
        / n;
    let scale = if mean_diagonal > T::zero() {
        mean_diagonal
    } else {
        T::one()
    };

    let mut is_constrained = vec![false; matrix.nrows()];
    let mut rows_to_visit = vec![false; matrix.nrows()];

    for &dof in constrained_dofs {
        is_constrained[dof] = true;
        rhs[dof] = T::zero();

        let mut row = matrix.row_mut(dof);
        let (cols, values) = row.cols_and_values_mut();
        for (&col, value) in cols.iter().zip(values) {
            if col == dof {
                *value = scale;
            } else {
                *value = T::zero();
                // (col, dof) lives in row col
                rows_to_visit[col] = true;
            }
        }
    }

    let rows = rows_to_visit
        .iter()
        .enumerate()
        .filter_map(|(row, &visit)| (visit && !is_constrained[row]).then_some(row));
    for row_index in rows {
        let mut row = matrix.row_mut(row_index);
        let (cols, values) = row.cols_and_values_mut();
        for (&col, value) in cols.iter().zip(values) {
            if is_constrained[col] {
                *value = T::zero();
            }
        }
    }
}
