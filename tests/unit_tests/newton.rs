use eyre::eyre;
use insta::assert_snapshot;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{dmatrix, dvector, DMatrix, DVector, DVectorView, DVectorViewMut};
use newton_fem::assembly::AssemblerBuilder;
use newton_fem::constraints::ConstraintSet;
use newton_fem::lifting::SymmetricLifting;
use newton_fem::newton::{NewtonError, NewtonRaphson, NewtonSettings, StopReason};
use newton_fem::solvers::{ConjugateGradient, DenseLu, RelativeResidualCriterion};
use newton_fem::{Assembler, ConstraintApplicator};
use proptest::collection::vec;
use proptest::prelude::*;
use std::error::Error;
use util::{estimate_convergence_order, is_monotonically_decreasing};

/// $R(x) = x^3 - 2$.
fn cube_root_assembler() -> impl Assembler<f64, Matrix = DMatrix<f64>> {
    AssemblerBuilder::with_dofs(1)
        .with_residual(|mut r: DVectorViewMut<f64>, x: DVectorView<f64>| r[0] = x[0].powi(3) - 2.0)
        .with_jacobian(|j: &mut DMatrix<f64>, x: DVectorView<f64>| j[(0, 0)] = 3.0 * x[0].powi(2))
}

fn affine_matrix() -> DMatrix<f64> {
    dmatrix![4.0, 1.0, 0.0;
             1.0, 3.0, -1.0;
             0.0, -1.0, 2.0]
}

/// $R(u) = A u - b$.
fn affine_assembler() -> impl Assembler<f64, Matrix = DMatrix<f64>> {
    let b = dvector![1.0, 2.0, 3.0];
    AssemblerBuilder::with_dofs(3)
        .with_residual(move |mut r: DVectorViewMut<f64>, u: DVectorView<f64>| {
            r.copy_from(&(affine_matrix() * u - &b));
        })
        .with_jacobian(|j: &mut DMatrix<f64>, _: DVectorView<f64>| j.copy_from(&affine_matrix()))
}

/// $R(x, y) = (x^2 + y - 3, x + y^2 - 5)$, with a root at $(1, 2)$.
fn two_by_two_assembler() -> impl Assembler<f64, Matrix = DMatrix<f64>> {
    AssemblerBuilder::with_dofs(2)
        .with_residual(|mut r: DVectorViewMut<f64>, u: DVectorView<f64>| {
            r[0] = u[0] * u[0] + u[1] - 3.0;
            r[1] = u[0] + u[1] * u[1] - 5.0;
        })
        .with_jacobian(|j: &mut DMatrix<f64>, u: DVectorView<f64>| {
            j.copy_from(&dmatrix![2.0 * u[0], 1.0;
                                  1.0,        2.0 * u[1]]);
        })
}

#[test]
fn cube_root_of_two() {
    let mut x = dvector![1.0];
    let settings = NewtonSettings {
        max_iterations: 50,
        correction_tolerance: 1e-10,
        ..NewtonSettings::default()
    };
    let output = NewtonRaphson::new()
        .with_assembler(cube_root_assembler())
        .with_linear_solver(DenseLu)
        .with_settings(settings)
        .solve(&mut x)
        .unwrap();

    assert_scalar_eq!(x[0], 1.259921049894873, comp = abs, tol = 1e-14);
    assert!(output.iterations < 10);
    assert_eq!(output.iterations, 6);
    assert_eq!(output.stop_reason, StopReason::CorrectionNorm);
    assert_eq!(output.history.len(), output.iterations);
    assert!(output.history.error_norms().all(|e| e.is_none()));
    assert!(is_monotonically_decreasing(output.history.correction_norms().skip(1), 0.0));

    let iterations: Vec<_> = output.history.iter().map(|record| record.iteration).collect();
    assert_eq!(iterations, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn affine_residual_converges_in_one_iteration_with_reference() {
    let reference = affine_matrix().lu().solve(&dvector![1.0, 2.0, 3.0]).unwrap();

    for seed in [dvector![0.0, 0.0, 0.0], dvector![10.0, -3.0, 7.5]] {
        let mut u = seed;
        let output = NewtonRaphson::new()
            .with_assembler(affine_assembler())
            .with_linear_solver(DenseLu)
            .with_reference_solution(&reference)
            .solve(&mut u)
            .unwrap();
        assert_eq!(output.iterations, 1);
        assert_eq!(output.stop_reason, StopReason::ReferenceError);
        assert_matrix_eq!(u, reference, comp = abs, tol = 1e-12);
    }
}

#[test]
fn affine_residual_without_reference_confirms_in_second_iteration() {
    let mut u = dvector![10.0, -3.0, 7.5];
    let output = NewtonRaphson::new()
        .with_assembler(affine_assembler())
        .with_linear_solver(DenseLu)
        .solve(&mut u)
        .unwrap();
    assert_eq!(output.iterations, 2);
    assert_eq!(output.stop_reason, StopReason::CorrectionNorm);
    assert!(output.history.records()[1].correction_norm < 1e-10);
}

#[test]
fn affine_residual_with_constraint() {
    // With u_2 = 1 the free rows give 4 u_0 + u_1 = 1 and u_0 + 3 u_1 = 3
    let constraints = ConstraintSet::new().with(2, 1.0);
    let reference = dvector![0.0, 1.0, 1.0];
    let mut u = DVector::zeros(3);
    let output = NewtonRaphson::new()
        .with_assembler(affine_assembler())
        .with_linear_solver(DenseLu)
        .with_constraints(&constraints)
        .with_reference_solution(&reference)
        .solve(&mut u)
        .unwrap();

    assert_eq!(output.iterations, 1);
    assert_eq!(output.stop_reason, StopReason::ReferenceError);
    assert_eq!(u[2], 1.0);
    assert_matrix_eq!(u, reference, comp = abs, tol = 1e-14);

    // -R(0, 0, 1) = (1, 3, 1), and the constrained row is dropped by the lifting
    let first = &output.history.records()[0];
    assert_scalar_eq!(first.residual_norm, 10.0f64.sqrt(), comp = abs, tol = 1e-14);
}

#[test]
fn quadratic_convergence_near_simple_root() {
    let reference = dvector![1.0, 2.0];
    let mut u = dvector![1.5, 2.5];
    let output = NewtonRaphson::new()
        .with_assembler(two_by_two_assembler())
        .with_linear_solver(DenseLu)
        .with_reference_solution(&reference)
        .solve(&mut u)
        .unwrap();

    assert_eq!(output.stop_reason, StopReason::ReferenceError);
    assert_eq!(output.iterations, 5);

    let errors: Vec<f64> = output
        .history
        .error_norms()
        .map(|e| e.expect("Reference was supplied"))
        .collect();
    let order = estimate_convergence_order(&errors[..4]);
    assert!(order > 1.8 && order < 2.2, "Estimated order {} is not quadratic", order);
}

#[test]
fn stopping_is_idempotent() {
    let settings = NewtonSettings::default();
    let mut x = dvector![1.0];
    NewtonRaphson::new()
        .with_assembler(cube_root_assembler())
        .with_linear_solver(DenseLu)
        .with_settings(settings)
        .solve(&mut x)
        .unwrap();

    let converged = x.clone();
    let output = NewtonRaphson::new()
        .with_assembler(cube_root_assembler())
        .with_linear_solver(DenseLu)
        .with_settings(settings)
        .solve(&mut x)
        .unwrap();

    assert_eq!(output.iterations, 1);
    assert_eq!(output.stop_reason, StopReason::CorrectionNorm);
    assert!((&x - &converged).norm() < settings.correction_tolerance);
}

#[test]
fn rootless_residual_does_not_converge() {
    // R(x) = x^2 + 1 has no real root
    let assembler = AssemblerBuilder::with_dofs(1)
        .with_residual(|mut r: DVectorViewMut<f64>, x: DVectorView<f64>| r[0] = x[0] * x[0] + 1.0)
        .with_jacobian(|j: &mut DMatrix<f64>, x: DVectorView<f64>| j[(0, 0)] = 2.0 * x[0]);
    let mut x = dvector![0.5];
    let err = NewtonRaphson::new()
        .with_assembler(assembler)
        .with_linear_solver(DenseLu)
        .with_settings(NewtonSettings {
            max_iterations: 5,
            ..NewtonSettings::default()
        })
        .solve(&mut x)
        .unwrap_err();

    match &err {
        NewtonError::NonConvergence { max_iterations, history } => {
            assert_eq!(*max_iterations, 5);
            assert_eq!(history.len(), 5);
        }
        _ => panic!("Expected non-convergence, got {:?}", err),
    }
    assert!(err.source().is_none());
    assert_snapshot!(err.to_string(), @"Failed to converge within maximum number of iterations (5).");
}

#[test]
fn singular_jacobian_fails_in_first_iteration() {
    let assembler = AssemblerBuilder::with_dofs(2)
        .with_residual(|mut r: DVectorViewMut<f64>, u: DVectorView<f64>| {
            r[0] = u[0] + 1.0;
            r[1] = u[1] + 1.0;
        })
        .with_jacobian(|j: &mut DMatrix<f64>, _: DVectorView<f64>| j.fill(0.0));
    let mut u = dvector![0.0, 0.0];
    let err = NewtonRaphson::new()
        .with_assembler(assembler)
        .with_linear_solver(DenseLu)
        .solve(&mut u)
        .unwrap_err();

    match &err {
        NewtonError::LinearSolveFailure { iteration, history, .. } => {
            assert_eq!(*iteration, 1);
            assert!(history.is_empty());
        }
        _ => panic!("Expected linear solve failure, got {:?}", err),
    }
    assert!(err.source().is_some());
    assert_snapshot!(
        err.to_string(),
        @"Failed to solve Jacobian system in Newton iteration 1. Error: Jacobian is singular, LU solve failed."
    );
}

#[test]
fn non_finite_residual_is_rejected_before_linear_solve() {
    // R(x) = sqrt(x - 2) is NaN at the initial guess
    let assembler = AssemblerBuilder::with_dofs(1)
        .with_residual(|mut r: DVectorViewMut<f64>, x: DVectorView<f64>| r[0] = (x[0] - 2.0).sqrt())
        .with_jacobian(|j: &mut DMatrix<f64>, x: DVectorView<f64>| j[(0, 0)] = 0.5 / (x[0] - 2.0).sqrt());
    let mut x = dvector![1.0];
    let err = NewtonRaphson::new()
        .with_assembler(assembler)
        .with_linear_solver(ConjugateGradient::new(RelativeResidualCriterion::new(1e-12)))
        .solve(&mut x)
        .unwrap_err();

    match &err {
        NewtonError::NonFiniteResidual { iteration, history } => {
            assert_eq!(*iteration, 1);
            assert!(history.is_empty());
        }
        _ => panic!("Expected non-finite residual, got {:?}", err),
    }
    assert_eq!(x, dvector![1.0]);
    assert_snapshot!(err.to_string(), @"Residual is not finite in Newton iteration 1.");
}

#[test]
fn non_finite_jacobian_fails_in_conjugate_gradient() {
    let assembler = AssemblerBuilder::with_dofs(1)
        .with_residual(|mut r: DVectorViewMut<f64>, x: DVectorView<f64>| r[0] = x[0] - 2.0)
        .with_jacobian(|j: &mut DMatrix<f64>, _: DVectorView<f64>| j[(0, 0)] = f64::NAN);
    let mut x = dvector![1.0];
    let err = NewtonRaphson::new()
        .with_assembler(assembler)
        .with_linear_solver(ConjugateGradient::new(RelativeResidualCriterion::new(1e-12)))
        .solve(&mut x)
        .unwrap_err();

    assert!(matches!(err, NewtonError::LinearSolveFailure { iteration: 1, .. }));
    assert_snapshot!(
        err.to_string(),
        @"Failed to solve Jacobian system in Newton iteration 1. Error: CG solve failed after 0 iterations. Residual is not finite."
    );
}

#[test]
fn out_of_bounds_constraint_is_rejected_before_assembly() {
    let constraints = ConstraintSet::new().with(0, 1.0).with(3, 2.0);
    let mut u = dvector![5.0, 5.0];
    let err = NewtonRaphson::new()
        .with_assembler(two_by_two_assembler())
        .with_linear_solver(DenseLu)
        .with_constraints(&constraints)
        .solve(&mut u)
        .unwrap_err();

    assert!(matches!(err, NewtonError::InvalidConstraintSet(_)));
    assert!(err.history().is_none());
    // The field is left untouched
    assert_matrix_eq!(u, dvector![5.0, 5.0]);
    assert_snapshot!(
        err.to_string(),
        @"Invalid constraint set: Constrained degree of freedom 3 is out of bounds for a field with 2 degrees of freedom."
    );
}

struct FailingAssembler {
    residual_calls: usize,
    fail_after: usize,
}

impl Assembler<f64> for FailingAssembler {
    type Matrix = DMatrix<f64>;

    fn num_dofs(&self) -> usize {
        1
    }

    fn create_jacobian(&self) -> DMatrix<f64> {
        DMatrix::zeros(1, 1)
    }

    fn assemble_residual_into(&mut self, mut residual: DVectorViewMut<f64>, field: DVectorView<f64>) -> eyre::Result<()> {
        self.residual_calls += 1;
        if self.residual_calls > self.fail_after {
            return Err(eyre!("Residual evaluation failed."));
        }
        residual[0] = field[0].powi(3) - 2.0;
        Ok(())
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut DMatrix<f64>, field: DVectorView<f64>) -> eyre::Result<()> {
        jacobian[(0, 0)] = 3.0 * field[0].powi(2);
        Ok(())
    }
}

#[test]
fn assembly_failure_is_reported_with_history() {
    let mut assembler = FailingAssembler {
        residual_calls: 0,
        fail_after: 2,
    };
    let mut x = dvector![1.0];
    let err = NewtonRaphson::new()
        .with_assembler(&mut assembler)
        .with_linear_solver(DenseLu)
        .solve(&mut x)
        .unwrap_err();

    match &err {
        NewtonError::AssemblyFailure { iteration, history, .. } => {
            assert_eq!(*iteration, 3);
            assert_eq!(history.len(), 2);
        }
        _ => panic!("Expected assembly failure, got {:?}", err),
    }
    assert_eq!(assembler.residual_calls, 3);
    assert_snapshot!(err.to_string(), @"Assembly failed in Newton iteration 3. Error: Residual evaluation failed.");
}

#[derive(Default)]
struct CountingApplicator {
    calls: usize,
    constrained_dofs: Vec<usize>,
}

impl ConstraintApplicator<f64, DMatrix<f64>> for CountingApplicator {
    fn apply(&mut self, matrix: &mut DMatrix<f64>, rhs: DVectorViewMut<f64>, constrained_dofs: &[usize]) {
        self.calls += 1;
        self.constrained_dofs = constrained_dofs.to_vec();
        SymmetricLifting.apply(matrix, rhs, constrained_dofs);
    }
}

#[test]
fn custom_constraint_applicator_is_used_every_iteration() {
    let constraints = ConstraintSet::new().with(1, 2.0);
    let mut applicator = CountingApplicator::default();
    let mut u = dvector![3.0, 0.0];
    let output = NewtonRaphson::new()
        .with_assembler(two_by_two_assembler())
        .with_linear_solver(DenseLu)
        .with_constraint_applicator(&mut applicator)
        .with_constraints(&constraints)
        .solve(&mut u)
        .unwrap();

    assert_eq!(applicator.calls, output.iterations);
    assert_eq!(applicator.constrained_dofs, vec![1]);
    // With y = 2 the first equation reads x^2 = 1
    assert_eq!(u[1], 2.0);
    assert_scalar_eq!(u[0], 1.0, comp = abs, tol = 1e-12);
}

#[test]
fn newton_settings_deserialize_with_defaults() {
    let settings: NewtonSettings<f64> = serde_json::from_str(r#"{ "max_iterations": 7 }"#).unwrap();
    assert_eq!(
        settings,
        NewtonSettings {
            max_iterations: 7,
            correction_tolerance: 1e-10,
            reference_error_tolerance: 1e-12,
        }
    );

    let json = serde_json::to_string(&settings).unwrap();
    let parsed: NewtonSettings<f64> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, settings);
}

/// Records every field the residual is evaluated at.
struct RecordingAssembler<A> {
    inner: A,
    fields: Vec<DVector<f64>>,
}

impl<A: Assembler<f64>> Assembler<f64> for RecordingAssembler<A> {
    type Matrix = A::Matrix;

    fn num_dofs(&self) -> usize {
        self.inner.num_dofs()
    }

    fn create_jacobian(&self) -> Self::Matrix {
        self.inner.create_jacobian()
    }

    fn assemble_residual_into(&mut self, residual: DVectorViewMut<f64>, field: DVectorView<f64>) -> eyre::Result<()> {
        self.fields.push(field.clone_owned());
        self.inner.assemble_residual_into(residual, field)
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut Self::Matrix, field: DVectorView<f64>) -> eyre::Result<()> {
        self.inner.assemble_jacobian_into(jacobian, field)
    }
}

/// $R_i(u) = u_i^3 + 2 u_i - u_{i - 1} - u_{i + 1} - 1$, whose Jacobian is irreducibly diagonally dominant.
fn chain_assembler(n: usize) -> impl Assembler<f64, Matrix = DMatrix<f64>> {
    AssemblerBuilder::with_dofs(n)
        .with_residual(move |mut r: DVectorViewMut<f64>, u: DVectorView<f64>| {
            for i in 0..n {
                let left = if i > 0 { u[i - 1] } else { 0.0 };
                let right = if i + 1 < n { u[i + 1] } else { 0.0 };
                r[i] = u[i].powi(3) + 2.0 * u[i] - left - right - 1.0;
            }
        })
        .with_jacobian(move |j: &mut DMatrix<f64>, u: DVectorView<f64>| {
            j.fill(0.0);
            for i in 0..n {
                j[(i, i)] = 3.0 * u[i].powi(2) + 2.0;
                if i > 0 {
                    j[(i, i - 1)] = -1.0;
                }
                if i + 1 < n {
                    j[(i, i + 1)] = -1.0;
                }
            }
        })
}

fn chain_problem() -> impl Strategy<Value = (DVector<f64>, ConstraintSet<f64>)> {
    (1usize..8).prop_flat_map(|n| {
        (vec(-2.0..2.0, n), vec((0..n, -2.0..2.0), 0..=n))
            .prop_map(|(seed, constraints)| (DVector::from_vec(seed), ConstraintSet::from(constraints)))
    })
}

proptest! {
    #[test]
    fn constrained_values_are_preserved_in_every_iteration((seed, constraints) in chain_problem()) {
        let n = seed.len();
        let mut assembler = RecordingAssembler { inner: chain_assembler(n), fields: Vec::new() };
        let mut u = seed;
        let result = NewtonRaphson::new()
            .with_assembler(&mut assembler)
            .with_linear_solver(DenseLu)
            .with_constraints(&constraints)
            .with_settings(NewtonSettings { max_iterations: 20, ..NewtonSettings::default() })
            .solve(&mut u);

        match &result {
            Ok(_) | Err(NewtonError::NonConvergence { .. }) => {}
            Err(err) => prop_assert!(false, "Unexpected error: {}", err),
        }

        prop_assert!(!assembler.fields.is_empty());
        for field in assembler.fields.iter().chain(std::iter::once(&u)) {
            for (dof, &value) in constraints.iter() {
                prop_assert_eq!(field[dof], value);
            }
        }
    }
}
