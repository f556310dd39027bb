//! The one-dimensional nonlinear Poisson problem $-(q(u) u')' = f$ with linear elements.
use crate::assembly::{add_element_matrix_to_csr, add_element_vector};
use crate::mesh::UniformIntervalMesh;
use crate::quadrature::{gauss, QuadraturePair1d};
use nalgebra::{DVectorView, DVectorViewMut, Matrix2};
use nalgebra_sparse::CsrMatrix;
use newton_fem_traits::{Assembler, Real};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// A solution-dependent conductivity $q(u)$.
pub trait Conductivity<T: Real> {
    fn conductivity(&self, u: T) -> T;

    /// The derivative $q'(u)$.
    fn conductivity_derivative(&self, u: T) -> T;
}

/// The conductivity $q(u) = 1 + \alpha u^2$.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuadraticConductivity<T> {
    pub alpha: T,
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
impl<T: Real> Conductivity<T> for QuadraticConductivity<T> {
    fn conductivity(&self, u: T) -> T {
        1.0 + self.alpha * u * u
    }

    fn conductivity_derivative(&self, u: T) -> T {
        2.0 * self.alpha * u
    }
}

/// Assembles the weak residual
/// $$ r_a(u) = \int q(u) u' N_a' \,\mathrm{d}x - \int f N_a \,\mathrm{d}x $$
/// and its consistent Jacobian
/// $$ K_{ab}(u) = \int q(u) N_b' N_a' \,\mathrm{d}x + \int q'(u) N_b u' N_a' \,\mathrm{d}x $$
/// on a uniform interval mesh, with one degree of freedom per vertex.
///
/// The Jacobian is not symmetric unless $q$ is constant.
pub struct NonlinearPoisson1d<'a, T: Real, Q, F> {
    mesh: &'a UniformIntervalMesh<T>,
    conductivity: Q,
    source: F,
    quadrature: QuadraturePair1d<T>,
}

impl<'a, T, Q, F> NonlinearPoisson1d<'a, T, Q, F>
where
    T: Real,
    Q: Conductivity<T>,
    F: Fn(T) -> T,
{
    /// Uses two-point Gauss quadrature by default.
    pub fn new(mesh: &'a UniformIntervalMesh<T>, conductivity: Q, source: F) -> Self {
        Self {
            mesh,
            conductivity,
            source,
            quadrature: gauss(2),
        }
    }

    pub fn with_quadrature(self, quadrature: QuadraturePair1d<T>) -> Self {
        Self { quadrature, ..self }
    }

    pub fn mesh(&self) -> &UniformIntervalMesh<T> {
        self.mesh
    }

    pub fn conductivity(&self) -> &Q {
        &self.conductivity
    }
}

impl<'a, T, Q, F> Assembler<T> for NonlinearPoisson1d<'a, T, Q, F>
where
    T: Real,
    Q: Conductivity<T>,
    F: Fn(T) -> T,
{
    type Matrix = CsrMatrix<T>;

    fn num_dofs(&self) -> usize {
        self.mesh.num_vertices()
    }

    fn create_jacobian(&self) -> CsrMatrix<T> {
        self.mesh.create_csr_matrix(1)
    }

    fn assemble_residual_into(&mut self, mut residual: DVectorViewMut<T>, u: DVectorView<T>) -> eyre::Result<()> {
        assert_eq!(u.len(), self.num_dofs());
        assert_eq!(residual.len(), self.num_dofs());
        residual.fill(T::zero());

        let (weights, points) = &self.quadrature;
        for (nodes, segment) in self.mesh.cell_iter() {
            let u_element = [u[nodes[0]], u[nodes[1]]];
            let gradients = segment.basis_gradients();
            let du = u_element[0] * gradients[0] + u_element[1] * gradients[1];
            let det = segment.reference_jacobian();

            let mut r_element = [T::zero(); 2];
            for (&w, &xi) in weights.iter().zip(points) {
                let phi = segment.evaluate_basis(xi);
                let x = segment.map_reference_coords(xi);
                let u_q = phi[0] * u_element[0] + phi[1] * u_element[1];
                let q = self.conductivity.conductivity(u_q);
                let f = (self.source)(x);
                for a in 0..2 {
                    r_element[a] += w * det * (q * du * gradients[a] - f * phi[a]);
                }
            }
            add_element_vector(&mut residual, &nodes, &r_element);
        }
        Ok(())
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut CsrMatrix<T>, u: DVectorView<T>) -> eyre::Result<()> {
        assert_eq!(u.len(), self.num_dofs());
        jacobian.values_mut().fill(T::zero());

        let (weights, points) = &self.quadrature;
        for (nodes, segment) in self.mesh.cell_iter() {
            let u_element = [u[nodes[0]], u[nodes[1]]];
            let gradients = segment.basis_gradients();
            let du = u_element[0] * gradients[0] + u_element[1] * gradients[1];
            let det = segment.reference_jacobian();

            let mut k_element = Matrix2::zeros();
            for (&w, &xi) in weights.iter().zip(points) {
                let phi = segment.evaluate_basis(xi);
                let u_q = phi[0] * u_element[0] + phi[1] * u_element[1];
                let q = self.conductivity.conductivity(u_q);
                let dq = self.conductivity.conductivity_derivative(u_q);
                for a in 0..2 {
                    for b in 0..2 {
                        k_element[(a, b)] +=
                            w * det * (q * gradients[b] * gradients[a] + dq * phi[b] * du * gradients[a]);
                    }
                }
            }
            add_element_matrix_to_csr(jacobian, &nodes, &k_element)?;
        }
        Ok(())
    }
}
