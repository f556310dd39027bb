//! One-dimensional solid mechanics for `newton-fem`.
//!
//! A bar of reference length $L$ is described by its displacement $u(X)$ and deformation
//! gradient $F = 1 + \mathrm{d}u / \mathrm{d}X$. The constitutive behavior is given by a
//! [`HyperelasticMaterial1d`], and [`HyperelasticBar`] assembles the resulting nonlinear system.
use newton_fem::Real;

pub mod bar;
pub mod materials;

pub use bar::HyperelasticBar;

pub trait HyperelasticMaterial1d<T: Real> {
    type Parameters: Clone + 'static;

    /// Compute the energy density $\psi = \psi(F)$ associated with the material.
    fn compute_energy_density(&self, deformation_gradient: T, parameters: &Self::Parameters) -> T;

    /// Compute the first Piola-Kirchhoff stress $P(F) = \psi'(F)$.
    fn compute_stress(&self, deformation_gradient: T, parameters: &Self::Parameters) -> T;

    /// Compute the tangent stiffness $\mathrm{d}P / \mathrm{d}F$.
    fn compute_stress_derivative(&self, deformation_gradient: T, parameters: &Self::Parameters) -> T;

    /// Whether the material is defined for the given deformation gradient.
    fn is_admissible(&self, _deformation_gradient: T) -> bool {
        true
    }
}
