//! Assembly helpers and assemblers built from plain closures.
//!
//! The closure assemblers are convenient for small systems and tests, where the residual and
//! Jacobian are given directly as functions of the field rather than assembled from a mesh.
use crate::calculus::approximate_jacobian_fd_into;
use eyre::eyre;
use nalgebra::storage::Storage;
use nalgebra::{DMatrix, DVectorView, DVectorViewMut, Dim, Matrix};
use nalgebra_sparse::{CsrMatrix, SparseEntryMut};
use newton_fem_traits::{Assembler, Real};

/// Adds an element matrix into the rows and columns of `matrix` given by `dofs`.
///
/// Fails if an entry is not part of the sparsity pattern of `matrix`.
pub fn add_element_matrix_to_csr<T, R, C, S>(
    matrix: &mut CsrMatrix<T>,
    dofs: &[usize],
    element_matrix: &Matrix<T, R, C, S>,
) -> eyre::Result<()>
where
    T: Real,
    R: Dim,
    C: Dim,
    S: Storage<T, R, C>,
{
    assert_eq!(element_matrix.nrows(), dofs.len());
    assert_eq!(element_matrix.ncols(), dofs.len());
    for (a, &row) in dofs.iter().enumerate() {
        let mut csr_row = matrix.row_mut(row);
        for (b, &col) in dofs.iter().enumerate() {
            match csr_row.get_entry_mut(col) {
                Some(SparseEntryMut::NonZero(value)) => *value += element_matrix[(a, b)],
                _ => return Err(eyre!("Entry ({}, {}) is not part of the sparsity pattern.", row, col)),
            }
        }
    }
    Ok(())
}

/// Adds an element vector into the entries of `vector` given by `dofs`.
pub fn add_element_vector<'a, T: Real>(vector: impl Into<DVectorViewMut<'a, T>>, dofs: &[usize], element_vector: &[T]) {
    let mut vector = vector.into();
    assert_eq!(element_vector.len(), dofs.len());
    for (&dof, &value) in dofs.iter().zip(element_vector) {
        vector[dof] += value;
    }
}

#[derive(Debug, Clone)]
pub struct AssemblerBuilder {
    num_dofs: usize,
}

/// An [`Assembler`] with a dense Jacobian, defined by a residual closure and a Jacobian closure.
#[derive(Debug, Clone)]
pub struct ClosureAssembler<R, J> {
    num_dofs: usize,
    residual: R,
    jacobian: J,
}

impl AssemblerBuilder {
    pub fn with_dofs(num_dofs: usize) -> Self {
        Self { num_dofs }
    }

    /// The closure is called as `residual(r, u)` and must write $R(u)$ into `r`.
    pub fn with_residual<R, T>(self, residual: R) -> ClosureAssembler<R, ()>
    where
        T: Real,
        R: FnMut(DVectorViewMut<T>, DVectorView<T>),
    {
        ClosureAssembler {
            num_dofs: self.num_dofs,
            residual,
            jacobian: (),
        }
    }
}

impl<R> ClosureAssembler<R, ()> {
    /// The closure is called as `jacobian(j, u)` and must overwrite `j` with $J(u)$.
    pub fn with_jacobian<J, T>(self, jacobian: J) -> ClosureAssembler<R, J>
    where
        T: Real,
        J: FnMut(&mut DMatrix<T>, DVectorView<T>),
    {
        ClosureAssembler {
            num_dofs: self.num_dofs,
            residual: self.residual,
            jacobian,
        }
    }

    /// Approximates the Jacobian with central differences of step size `h`.
    pub fn with_finite_difference_jacobian<T: Real>(self, h: T) -> FiniteDifferenceAssembler<R, T> {
        FiniteDifferenceAssembler {
            num_dofs: self.num_dofs,
            residual: self.residual,
            h,
        }
    }
}

impl<T, R, J> Assembler<T> for ClosureAssembler<R, J>
where
    T: Real,
    R: FnMut(DVectorViewMut<T>, DVectorView<T>),
    J: FnMut(&mut DMatrix<T>, DVectorView<T>),
{
    type Matrix = DMatrix<T>;

    fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    fn create_jacobian(&self) -> DMatrix<T> {
        DMatrix::zeros(self.num_dofs, self.num_dofs)
    }

    fn assemble_residual_into(&mut self, residual: DVectorViewMut<T>, field: DVectorView<T>) -> eyre::Result<()> {
        (self.residual)(residual, field);
        Ok(())
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut DMatrix<T>, field: DVectorView<T>) -> eyre::Result<()> {
        (self.jacobian)(jacobian, field);
        Ok(())
    }
}

/// An [`Assembler`] whose Jacobian is a central finite difference approximation of the
/// residual closure.
///
/// Each Jacobian assembly costs $2n$ residual evaluations, so this is only suitable for small
/// systems or for checking hand-derived Jacobians.
#[derive(Debug, Clone)]
pub struct FiniteDifferenceAssembler<R, T> {
    num_dofs: usize,
    residual: R,
    h: T,
}

impl<T, R> Assembler<T> for FiniteDifferenceAssembler<R, T>
where
    T: Real,
    R: FnMut(DVectorViewMut<T>, DVectorView<T>),
{
    type Matrix = DMatrix<T>;

    fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    fn create_jacobian(&self) -> DMatrix<T> {
        DMatrix::zeros(self.num_dofs, self.num_dofs)
    }

    fn assemble_residual_into(&mut self, residual: DVectorViewMut<T>, field: DVectorView<T>) -> eyre::Result<()> {
        (self.residual)(residual, field);
        Ok(())
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut DMatrix<T>, field: DVectorView<T>) -> eyre::Result<()> {
        let mut x = field.clone_owned();
        let residual = &mut self.residual;
        approximate_jacobian_fd_into(jacobian, |x, r| residual(r, x), &mut x, self.h);
        Ok(())
    }
}
