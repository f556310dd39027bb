//! Newton-Raphson iteration for constrained nonlinear systems $R(u) = 0$.
use crate::constraints::{ConstraintSet, InvalidConstraintError};
use log::{debug, info, warn};
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use newton_fem_sparse::lifting::SymmetricLifting;
use newton_fem_traits::{Assembler, ConstraintApplicator, LinearSolver, Real};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "T: Real + Deserialize<'de>"))]
pub struct NewtonSettings<T> {
    /// The maximum number of Newton iterations (linear solves) before giving up.
    pub max_iterations: usize,
    /// The iteration stops once $\norm{\Delta u}_2$ falls below this tolerance.
    pub correction_tolerance: T,
    /// The iteration stops once $\norm{u - u_{\text{ref}}}_2$ falls below this tolerance.
    /// Only used when a reference solution is supplied.
    pub reference_error_tolerance: T,
}

impl<T: Real> Default for NewtonSettings<T> {
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn default() -> Self {
        Self {
            max_iterations: 50,
            correction_tolerance: 1e-10,
            reference_error_tolerance: 1e-12,
        }
    }
}

/// Diagnostics for a single Newton iteration.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord<T> {
    /// One-based iteration number.
    pub iteration: usize,
    pub correction_norm: T,
    /// Norm of the residual at the start of the iteration, after the constraints are applied.
    /// Rows of constrained degrees of freedom are zero at that point and do not contribute.
    pub residual_norm: T,
    /// Distance to the reference solution after the update, if a reference was supplied.
    pub error_norm: Option<T>,
}

/// Append-only record of the norms observed during a Newton solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceHistory<T> {
    records: Vec<IterationRecord<T>>,
}

impl<T> Default for ConvergenceHistory<T> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<T: Copy> ConvergenceHistory<T> {
    fn push(&mut self, record: IterationRecord<T>) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IterationRecord<T>] {
        &self.records
    }

    pub fn last(&self) -> Option<&IterationRecord<T>> {
        self.records.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IterationRecord<T>> {
        self.records.iter()
    }

    pub fn correction_norms(&self) -> impl Iterator<Item = T> + '_ {
        self.records.iter().map(|record| record.correction_norm)
    }

    pub fn residual_norms(&self) -> impl Iterator<Item = T> + '_ {
        self.records.iter().map(|record| record.residual_norm)
    }

    pub fn error_norms(&self) -> impl Iterator<Item = Option<T>> + '_ {
        self.records.iter().map(|record| record.error_norm)
    }
}

/// The criterion that terminated a successful solve.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The distance to the reference solution fell below the reference error tolerance.
    ReferenceError,
    /// The norm of the correction fell below the correction tolerance.
    CorrectionNorm,
}

#[derive(Debug, Clone)]
pub struct NewtonOutput<T> {
    /// The number of iterations performed, including the one that met the stopping criterion.
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub history: ConvergenceHistory<T>,
}

#[derive(Debug)]
pub enum NewtonError<T> {
    /// A constrained index is out of bounds. Detected before any assembly takes place.
    InvalidConstraintSet(InvalidConstraintError),
    /// Assembly of the residual or the Jacobian failed.
    AssemblyFailure {
        iteration: usize,
        history: ConvergenceHistory<T>,
        source: eyre::Report,
    },
    /// The residual contains non-finite values. Detected before the linear solve.
    NonFiniteResidual {
        iteration: usize,
        history: ConvergenceHistory<T>,
    },
    /// The linear solver could not produce a correction.
    LinearSolveFailure {
        iteration: usize,
        history: ConvergenceHistory<T>,
        source: Box<dyn Error>,
    },
    /// The maximum number of iterations was reached without meeting a stopping criterion.
    NonConvergence {
        max_iterations: usize,
        history: ConvergenceHistory<T>,
    },
}

impl<T> NewtonError<T> {
    /// The iterations completed before the failure, if any iteration was attempted.
    pub fn history(&self) -> Option<&ConvergenceHistory<T>> {
        match self {
            Self::InvalidConstraintSet(_) => None,
            Self::AssemblyFailure { history, .. }
            | Self::NonFiniteResidual { history, .. }
            | Self::LinearSolveFailure { history, .. }
            | Self::NonConvergence { history, .. } => Some(history),
        }
    }
}

impl<T> fmt::Display for NewtonError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConstraintSet(err) => write!(f, "Invalid constraint set: {}", err),
            Self::AssemblyFailure { iteration, source, .. } => {
                write!(f, "Assembly failed in Newton iteration {}. Error: {}", iteration, source)
            }
            Self::NonFiniteResidual { iteration, .. } => {
                write!(f, "Residual is not finite in Newton iteration {}.", iteration)
            }
            Self::LinearSolveFailure { iteration, source, .. } => {
                write!(f, "Failed to solve Jacobian system in Newton iteration {}. Error: {}", iteration, source)
            }
            Self::NonConvergence { max_iterations, .. } => {
                write!(f, "Failed to converge within maximum number of iterations ({}).", max_iterations)
            }
        }
    }
}

impl<T: fmt::Debug> Error for NewtonError<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidConstraintSet(err) => Some(err),
            Self::AssemblyFailure { source, .. } => Some(&**source),
            Self::LinearSolveFailure { source, .. } => Some(&**source),
            Self::NonFiniteResidual { .. } | Self::NonConvergence { .. } => None,
        }
    }
}

/// Storage for the linearized system $J \Delta u = -R$.
///
/// Allocated once per solve and re-filled in every iteration, so that the Jacobian storage
/// (and its sparsity pattern) is reused across iterations.
#[derive(Debug, Clone)]
pub struct LinearSystem<T: Scalar, M> {
    pub jacobian: M,
    pub rhs: DVector<T>,
    pub correction: DVector<T>,
}

impl<T: Real, M> LinearSystem<T, M> {
    pub fn for_assembler(assembler: &impl Assembler<T, Matrix = M>) -> Self {
        let n = assembler.num_dofs();
        Self {
            jacobian: assembler.create_jacobian(),
            rhs: DVector::zeros(n),
            correction: DVector::zeros(n),
        }
    }
}

/// Newton-Raphson solver for $R(u) = 0$ subject to Dirichlet constraints.
///
/// The solver is configured with builder methods:
///
/// ```ignore
/// let output = NewtonRaphson::new()
///     .with_assembler(&mut assembler)
///     .with_linear_solver(DenseLu)
///     .with_constraints(&constraints)
///     .with_settings(settings)
///     .solve(&mut u)?;
/// ```
///
/// Constraints are enforced with [`SymmetricLifting`] unless another
/// [`ConstraintApplicator`] is given.
pub struct NewtonRaphson<'a, T: Scalar, A, S, C> {
    assembler: A,
    linear_solver: S,
    applicator: C,
    constraints: Option<&'a ConstraintSet<T>>,
    reference: Option<DVectorView<'a, T>>,
    settings: NewtonSettings<T>,
}

impl<'a, T: Real> NewtonRaphson<'a, T, (), (), SymmetricLifting> {
    pub fn new() -> Self {
        Self {
            assembler: (),
            linear_solver: (),
            applicator: SymmetricLifting,
            constraints: None,
            reference: None,
            settings: NewtonSettings::default(),
        }
    }
}

impl<'a, T: Real> Default for NewtonRaphson<'a, T, (), (), SymmetricLifting> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Scalar, S, C> NewtonRaphson<'a, T, (), S, C> {
    pub fn with_assembler<A>(self, assembler: A) -> NewtonRaphson<'a, T, A, S, C> {
        NewtonRaphson {
            assembler,
            linear_solver: self.linear_solver,
            applicator: self.applicator,
            constraints: self.constraints,
            reference: self.reference,
            settings: self.settings,
        }
    }
}

impl<'a, T: Scalar, A, C> NewtonRaphson<'a, T, A, (), C> {
    pub fn with_linear_solver<S>(self, linear_solver: S) -> NewtonRaphson<'a, T, A, S, C> {
        NewtonRaphson {
            assembler: self.assembler,
            linear_solver,
            applicator: self.applicator,
            constraints: self.constraints,
            reference: self.reference,
            settings: self.settings,
        }
    }
}

impl<'a, T: Scalar, A, S, C> NewtonRaphson<'a, T, A, S, C> {
    pub fn with_constraint_applicator<C2>(self, applicator: C2) -> NewtonRaphson<'a, T, A, S, C2> {
        NewtonRaphson {
            assembler: self.assembler,
            linear_solver: self.linear_solver,
            applicator,
            constraints: self.constraints,
            reference: self.reference,
            settings: self.settings,
        }
    }

    pub fn with_constraints(self, constraints: &'a ConstraintSet<T>) -> Self {
        Self {
            constraints: Some(constraints),
            ..self
        }
    }

    /// Supplies a known solution. The distance to it is recorded in every iteration and
    /// used as the primary stopping criterion.
    pub fn with_reference_solution(self, reference: impl Into<DVectorView<'a, T>>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..self
        }
    }

    pub fn with_settings(self, settings: NewtonSettings<T>) -> Self {
        Self { settings, ..self }
    }

    pub fn settings(&self) -> &NewtonSettings<T> {
        &self.settings
    }
}

impl<'a, T, A, S, C> NewtonRaphson<'a, T, A, S, C>
where
    T: Real,
    A: Assembler<T>,
    S: LinearSolver<T, A::Matrix>,
    C: ConstraintApplicator<T, A::Matrix>,
{
    /// Attempts to solve $R(u) = 0$, starting from the provided field.
    ///
    /// The prescribed values of the constraint set are written into `field` before the first
    /// iteration. Each iteration then assembles $J(u)$ and $R(u)$ at the current iterate,
    /// applies the constraints to $J \Delta u = -R$, solves for the correction $\Delta u$
    /// (which is zero at every constrained degree of freedom) and updates $u \gets u + \Delta u$.
    ///
    /// The iteration stops successfully when, checked in this order,
    ///
    /// 1. a reference solution is given and $\norm{u - u_{\text{ref}}}_2$ is below the reference
    ///    error tolerance, or
    /// 2. $\norm{\Delta u}_2$ is below the correction tolerance.
    ///
    /// A residual with non-finite entries is never passed on to the linear solver, the solve
    /// fails with [`NewtonError::NonFiniteResidual`] instead.
    ///
    /// On failure, `field` holds the last iterate and the returned error carries the history
    /// of the iterations performed so far.
    ///
    /// # Panics
    ///
    /// Panics if the field or the reference solution do not have the number of degrees of
    /// freedom reported by the assembler.
    pub fn solve<'b>(&mut self, field: impl Into<DVectorViewMut<'b, T>>) -> Result<NewtonOutput<T>, NewtonError<T>> {
        let mut field = field.into();
        let num_dofs = self.assembler.num_dofs();
        assert_eq!(
            field.len(),
            num_dofs,
            "Field dimension must match the number of degrees of freedom of the assembler."
        );
        if let Some(reference) = &self.reference {
            assert_eq!(
                reference.len(),
                num_dofs,
                "Reference dimension must match the number of degrees of freedom of the assembler."
            );
        }

        let no_constraints = ConstraintSet::new();
        let constraints = self.constraints.unwrap_or(&no_constraints);
        constraints
            .validate(num_dofs)
            .map_err(NewtonError::InvalidConstraintSet)?;
        constraints.apply_to_field(&mut field);

        let settings = self.settings;
        let mut system = LinearSystem::for_assembler(&self.assembler);
        let mut history = ConvergenceHistory::default();

        for iteration in 1..=settings.max_iterations {
            let LinearSystem {
                jacobian,
                rhs,
                correction,
            } = &mut system;

            let assembly_result = self
                .assembler
                .assemble_jacobian_into(jacobian, DVectorView::from(&field))
                .and_then(|_| {
                    self.assembler
                        .assemble_residual_into(DVectorViewMut::from(&mut *rhs), DVectorView::from(&field))
                });
            if let Err(source) = assembly_result {
                warn!("Assembly failed in Newton iteration {}: {}", iteration, source);
                return Err(NewtonError::AssemblyFailure {
                    iteration,
                    history,
                    source,
                });
            }

            // J du = -R
            rhs.neg_mut();
            self.applicator
                .apply(jacobian, DVectorViewMut::from(&mut *rhs), constraints.dofs());
            let residual_norm = rhs.norm();
            if !residual_norm.is_finite() {
                warn!("Non-finite residual in Newton iteration {}", iteration);
                return Err(NewtonError::NonFiniteResidual { iteration, history });
            }

            let solve_result =
                self.linear_solver
                    .solve(&*jacobian, DVectorView::from(&*rhs), DVectorViewMut::from(&mut *correction));
            if let Err(source) = solve_result {
                warn!("Linear solve failed in Newton iteration {}: {}", iteration, source);
                return Err(NewtonError::LinearSolveFailure {
                    iteration,
                    history,
                    source,
                });
            }

            constraints.zero_constrained(&mut *correction, T::zero());
            field.axpy(T::one(), &*correction, T::one());

            let correction_norm = correction.norm();
            let error_norm = self
                .reference
                .as_ref()
                .map(|reference| field.metric_distance(reference));
            debug!(
                "Newton iteration {}: |R| = {}, |du| = {}, error = {:?}",
                iteration, residual_norm, correction_norm, error_norm
            );
            history.push(IterationRecord {
                iteration,
                correction_norm,
                residual_norm,
                error_norm,
            });

            let stop_reason = match error_norm {
                Some(error) if error < settings.reference_error_tolerance => Some(StopReason::ReferenceError),
                _ if correction_norm < settings.correction_tolerance => Some(StopReason::CorrectionNorm),
                _ => None,
            };

            if let Some(stop_reason) = stop_reason {
                info!("Newton converged after {} iterations ({:?})", iteration, stop_reason);
                return Ok(NewtonOutput {
                    iterations: iteration,
                    stop_reason,
                    history,
                });
            }
        }

        warn!("Newton failed to converge within {} iterations", settings.max_iterations);
        Err(NewtonError::NonConvergence {
            max_iterations: settings.max_iterations,
            history,
        })
    }
}
