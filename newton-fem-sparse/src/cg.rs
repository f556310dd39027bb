use core::fmt;
use log::trace;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use newton_fem_traits::{LinearSolver, Real};
use num::Zero;
use std::error::Error;

/// An operator $y = A x$.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T: Real> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T: Real> LinearOperator<T> for CsrMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        if y.len() != self.nrows() || x.len() != self.ncols() {
            return Err(Box::from(format!(
                "Dimension mismatch: {}x{} operator applied to vector of length {} with output length {}.",
                self.nrows(),
                self.ncols(),
                x.len(),
                y.len()
            )));
        }
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

/// Diagonal (Jacobi) preconditioner $P = \operatorname{diag}(A)^{-1}$.
///
/// Zero diagonal entries are left unscaled.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: Scalar> {
    inverse_diagonal: DVector<T>,
}

impl<T: Real> JacobiPreconditioner<T> {
    pub fn from_diagonal(diagonal: impl IntoIterator<Item = T>) -> Self {
        let inverse_diagonal: Vec<T> = diagonal
            .into_iter()
            .map(|d| if d == T::zero() { T::one() } else { T::one() / d })
            .collect();
        Self {
            inverse_diagonal: DVector::from_vec(inverse_diagonal),
        }
    }

    pub fn from_csr(matrix: &CsrMatrix<T>) -> Self {
        Self::from_diagonal(csr_diagonal(matrix))
    }

    pub fn from_dense(matrix: &DMatrix<T>) -> Self {
        Self::from_diagonal(matrix.diagonal().iter().copied())
    }
}

impl<T: Real> LinearOperator<T> for JacobiPreconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.zip_zip_apply(&x, &self.inverse_diagonal, |y_i, x_i, d_i| *y_i = d_i * x_i);
        Ok(())
    }
}

fn csr_diagonal<T: Real>(matrix: &CsrMatrix<T>) -> Vec<T> {
    matrix
        .row_iter()
        .enumerate()
        .map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .find(|(j, _)| **j == i)
                .map(|(_, &v)| v)
                .unwrap_or(T::zero())
        })
        .collect()
}

/// Relative residual tolerance $\norm{r} \leq \text{tol} \norm{b}$.
///
/// Note that we use the *approximate* residual given by Conjugate-Gradient. For ill-conditioned
/// problems, it is possible that CG's residual converges, but the real residual does not.
#[derive(Debug, Clone, Copy)]
pub struct RelativeResidualCriterion<T> {
    tol: T,
}

impl<T> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }

    pub fn tolerance(&self) -> &T {
        &self.tol
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-12)
    }
}

impl Default for RelativeResidualCriterion<f32> {
    fn default() -> Self {
        Self::new(1e-5)
    }
}

/// Selects the preconditioner built for each solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preconditioning {
    #[default]
    None,
    Jacobi,
}

/// Buffers reused across solves.
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    Ap: DVector<T>,
}

impl<T: Scalar + Zero> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            Ap: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> CgWorkspace<T> {
    fn resize(&mut self, dim: usize) {
        self.r.resize_vertically_mut(dim, T::zero());
        self.z.resize_vertically_mut(dim, T::zero());
        self.p.resize_vertically_mut(dim, T::zero());
        self.Ap.resize_vertically_mut(dim, T::zero());
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    IndefiniteOperator,
    IndefinitePreconditioner,
    NonFiniteResidual,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {}", err),
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite."),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner."),
            Self::NonFiniteResidual => write!(f, "Residual is not finite."),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

#[derive(Debug)]
pub struct SolveError {
    pub num_iterations: usize,
    pub kind: SolveErrorKind,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG solve failed after {} iterations. {}", self.num_iterations, self.kind)
    }
}

impl Error for SolveError {}

/// Preconditioned Conjugate-Gradient for symmetric positive definite systems.
///
/// Every solve starts from a zero initial guess, which is the natural guess for a Newton
/// correction. The workspace is kept between solves, so a single instance can be reused across
/// Newton iterations without reallocating.
///
/// Unless set with [`with_max_iter`](Self::with_max_iter), the number of iterations is capped at
/// ten times the dimension of the system.
#[derive(Debug, Clone)]
pub struct ConjugateGradient<T: Scalar> {
    workspace: CgWorkspace<T>,
    criterion: RelativeResidualCriterion<T>,
    preconditioning: Preconditioning,
    max_iter: Option<usize>,
}

impl<T: Scalar + Zero> ConjugateGradient<T> {
    pub fn new(criterion: RelativeResidualCriterion<T>) -> Self {
        Self {
            workspace: CgWorkspace::default(),
            criterion,
            preconditioning: Preconditioning::None,
            max_iter: None,
        }
    }

    pub fn with_preconditioning(self, preconditioning: Preconditioning) -> Self {
        Self {
            preconditioning,
            ..self
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<T: Real> ConjugateGradient<T> {
    /// Solves $A x = b$ with preconditioner $P$, returning the number of iterations.
    ///
    /// The content of `x` on entry is used as initial guess.
    #[allow(non_snake_case)]
    pub fn solve_with_guess(
        &mut self,
        operator: &dyn LinearOperator<T>,
        preconditioner: &dyn LinearOperator<T>,
        b: DVectorView<T>,
        mut x: DVectorViewMut<T>,
    ) -> Result<usize, SolveError> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut num_iterations = 0;
        let fail = |num_iterations, kind| SolveError { num_iterations, kind };

        self.workspace.resize(x.len());
        let CgWorkspace { r, z, p, Ap } = &mut self.workspace;

        let max_iter = self.max_iter.unwrap_or(10 * x.len());
        let b_norm = b.norm();
        if !b_norm.is_finite() {
            return Err(fail(num_iterations, NonFiniteResidual));
        }
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(0);
        }

        // r = b - Ax
        operator
            .apply(DVectorViewMut::from(&mut *r), DVectorView::from(&x))
            .map_err(|err| fail(num_iterations, OperatorError(err)))?;
        r.zip_apply(&b, |r_i, b_i| *r_i = b_i - *r_i);

        // z = Pr
        preconditioner
            .apply(DVectorViewMut::from(&mut *z), DVectorView::from(&*r))
            .map_err(|err| fail(num_iterations, PreconditionerError(err)))?;
        p.copy_from(&*z);
        let mut zTr = z.dot(&*r);

        loop {
            let r_norm = r.norm();
            if !r_norm.is_finite() {
                return Err(fail(num_iterations, NonFiniteResidual));
            }
            if r_norm <= self.criterion.tol * b_norm {
                break;
            }
            if num_iterations >= max_iter {
                return Err(fail(num_iterations, MaxIterationsReached { max_iter }));
            }

            operator
                .apply(DVectorViewMut::from(&mut *Ap), DVectorView::from(&*p))
                .map_err(|err| fail(num_iterations, OperatorError(err)))?;
            let pAp = p.dot(&*Ap);
            if !pAp.is_finite() {
                return Err(fail(num_iterations, NonFiniteResidual));
            }
            if pAp <= T::zero() {
                return Err(fail(num_iterations, IndefiniteOperator));
            }
            if zTr <= T::zero() {
                return Err(fail(num_iterations, IndefinitePreconditioner));
            }

            let alpha = zTr / pAp;
            x.axpy(alpha, &*p, T::one());
            r.axpy(-alpha, &*Ap, T::one());
            num_iterations += 1;

            preconditioner
                .apply(DVectorViewMut::from(&mut *z), DVectorView::from(&*r))
                .map_err(|err| fail(num_iterations, PreconditionerError(err)))?;
            let zTr_next = z.dot(&*r);
            let beta = zTr_next / zTr;
            // p <- z + beta * p
            p.zip_apply(&*z, |p_i, z_i| *p_i = z_i + beta * *p_i);
            zTr = zTr_next;
        }

        trace!("CG converged in {} iterations", num_iterations);
        Ok(num_iterations)
    }
}

impl<T: Real> LinearSolver<T, CsrMatrix<T>> for ConjugateGradient<T> {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<T>,
        rhs: DVectorView<T>,
        mut solution: DVectorViewMut<T>,
    ) -> Result<(), Box<dyn Error>> {
        solution.fill(T::zero());
        match self.preconditioning {
            Preconditioning::None => self.solve_with_guess(matrix, &IdentityOperator, rhs, solution)?,
            Preconditioning::Jacobi => {
                let jacobi = JacobiPreconditioner::from_csr(matrix);
                self.solve_with_guess(matrix, &jacobi, rhs, solution)?
            }
        };
        Ok(())
    }
}

impl<T: Real> LinearSolver<T, DMatrix<T>> for ConjugateGradient<T> {
    fn solve(
        &mut self,
        matrix: &DMatrix<T>,
        rhs: DVectorView<T>,
        mut solution: DVectorViewMut<T>,
    ) -> Result<(), Box<dyn Error>> {
        solution.fill(T::zero());
        match self.preconditioning {
            Preconditioning::None => self.solve_with_guess(matrix, &IdentityOperator, rhs, solution)?,
            Preconditioning::Jacobi => {
                let jacobi = JacobiPreconditioner::from_dense(matrix);
                self.solve_with_guess(matrix, &jacobi, rhs, solution)?
            }
        };
        Ok(())
    }
}
