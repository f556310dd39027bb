use crate::HyperelasticMaterial1d;
use eyre::eyre;
use newton_fem::assembly::{add_element_matrix_to_csr, add_element_vector};
use newton_fem::mesh::{Segment2, UniformIntervalMesh};
use newton_fem::nalgebra::{DVectorView, DVectorViewMut, Matrix2};
use newton_fem::nalgebra_sparse::CsrMatrix;
use newton_fem::quadrature::{gauss, QuadraturePair1d};
use newton_fem::{Assembler, Real};

/// A hyperelastic bar under a uniform body force and a traction at its right end.
///
/// The unknowns are the nodal displacements on the reference mesh. The residual is the internal
/// force minus the external force,
/// $$
/// r_a(u) = \int P(F) N_a' \,\mathrm{d}X - \int b N_a \,\mathrm{d}X - t \, \delta_{a, n},
/// $$
/// where $n$ is the rightmost vertex. The Jacobian
/// $K_{ab} = \int \frac{\mathrm{d}P}{\mathrm{d}F} N_a' N_b' \,\mathrm{d}X$ is symmetric, and positive
/// definite once the bar is fixed at one end and the tangent is positive.
pub struct HyperelasticBar<'a, T: Real, M: HyperelasticMaterial1d<T>> {
    mesh: &'a UniformIntervalMesh<T>,
    material: M,
    parameters: M::Parameters,
    body_force: T,
    traction: T,
    quadrature: QuadraturePair1d<T>,
}

impl<'a, T, M> HyperelasticBar<'a, T, M>
where
    T: Real,
    M: HyperelasticMaterial1d<T>,
{
    pub fn new(mesh: &'a UniformIntervalMesh<T>, material: M, parameters: M::Parameters) -> Self {
        Self {
            mesh,
            material,
            parameters,
            body_force: T::zero(),
            traction: T::zero(),
            quadrature: gauss(2),
        }
    }

    /// Body force per unit reference length.
    pub fn with_body_force(self, body_force: T) -> Self {
        Self { body_force, ..self }
    }

    /// Force applied at the right end of the bar.
    pub fn with_traction(self, traction: T) -> Self {
        Self { traction, ..self }
    }

    pub fn mesh(&self) -> &UniformIntervalMesh<T> {
        self.mesh
    }

    pub fn parameters(&self) -> &M::Parameters {
        &self.parameters
    }

    /// The (constant) deformation gradient of each cell for the given displacement.
    pub fn deformation_gradients<'b>(&'b self, u: DVectorView<'b, T>) -> impl 'b + Iterator<Item = T> {
        self.mesh
            .cell_iter()
            .map(move |(nodes, segment)| deformation_gradient(&segment, [u[nodes[0]], u[nodes[1]]]))
    }

    /// The total strain energy of the bar, without the potential of external forces.
    pub fn compute_strain_energy(&self, u: DVectorView<T>) -> T {
        let (weights, _) = &self.quadrature;
        let weight_sum = weights.iter().fold(T::zero(), |sum, &w| sum + w);
        self.mesh
            .cell_iter()
            .map(|(nodes, segment)| {
                let f = deformation_gradient(&segment, [u[nodes[0]], u[nodes[1]]]);
                weight_sum * segment.reference_jacobian() * self.material.compute_energy_density(f, &self.parameters)
            })
            .fold(T::zero(), |energy, e| energy + e)
    }

    fn admissible_deformation_gradient(&self, cell_index: usize, segment: &Segment2<T>, u: [T; 2]) -> eyre::Result<T> {
        let f = deformation_gradient(segment, u);
        if self.material.is_admissible(f) {
            Ok(f)
        } else {
            Err(eyre!(
                "Inadmissible deformation gradient {} in cell {}.",
                f,
                cell_index
            ))
        }
    }
}

fn deformation_gradient<T: Real>(segment: &Segment2<T>, u: [T; 2]) -> T {
    let [g0, g1] = segment.basis_gradients();
    T::one() + g0 * u[0] + g1 * u[1]
}

impl<'a, T, M> Assembler<T> for HyperelasticBar<'a, T, M>
where
    T: Real,
    M: HyperelasticMaterial1d<T>,
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
        for (cell_index, (nodes, segment)) in self.mesh.cell_iter().enumerate() {
            let f = self.admissible_deformation_gradient(cell_index, &segment, [u[nodes[0]], u[nodes[1]]])?;
            let p = self.material.compute_stress(f, &self.parameters);
            let gradients = segment.basis_gradients();
            let det = segment.reference_jacobian();

            let mut r_element = [T::zero(); 2];
            for (&w, &xi) in weights.iter().zip(points) {
                let phi = segment.evaluate_basis(xi);
                for a in 0..2 {
                    r_element[a] += w * det * (p * gradients[a] - self.body_force * phi[a]);
                }
            }
            add_element_vector(&mut residual, &nodes, &r_element);
        }

        let [_, right] = self.mesh.boundary_vertices();
        residual[right] -= self.traction;
        Ok(())
    }

    fn assemble_jacobian_into(&mut self, jacobian: &mut CsrMatrix<T>, u: DVectorView<T>) -> eyre::Result<()> {
        assert_eq!(u.len(), self.num_dofs());
        jacobian.values_mut().fill(T::zero());

        let (weights, _) = &self.quadrature;
        let weight_sum = weights.iter().fold(T::zero(), |sum, &w| sum + w);
        for (cell_index, (nodes, segment)) in self.mesh.cell_iter().enumerate() {
            let f = self.admissible_deformation_gradient(cell_index, &segment, [u[nodes[0]], u[nodes[1]]])?;
            let tangent = self.material.compute_stress_derivative(f, &self.parameters);
            let gradients = segment.basis_gradients();
            let det = segment.reference_jacobian();

            // The integrand is constant over the cell
            let k_element = Matrix2::from_fn(|a, b| weight_sum * det * tangent * gradients[a] * gradients[b]);
            add_element_matrix_to_csr(jacobian, &nodes, &k_element)?;
        }
        Ok(())
    }
}
