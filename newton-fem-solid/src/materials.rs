use crate::HyperelasticMaterial1d;
use newton_fem::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LameParameters1d<T> {
    pub mu: T,
    pub lambda: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoungPoisson<T> {
    pub young: T,
    pub poisson: T,
}

impl<T: Real> From<YoungPoisson<T>> for LameParameters1d<T> {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn from(params: YoungPoisson<T>) -> Self {
        let YoungPoisson { young, poisson } = params;
        let mu = 0.5 * young / (1.0 + poisson);
        let lambda = 2.0 * mu * poisson / (1.0 - 2.0 * poisson);
        Self { mu, lambda }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoungModulus<T> {
    pub young: T,
}

/// The linear elastic material model.
///
/// Given Young's modulus $E$, the strain energy density is
/// $$
/// \psi(F) = \frac{E}{2} (F - 1)^2,
/// $$
/// with stress $P(F) = E (F - 1)$ and constant tangent $E$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearElastic1d;

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> HyperelasticMaterial1d<T> for LinearElastic1d {
    type Parameters = YoungModulus<T>;

    fn compute_energy_density(&self, F: T, parameters: &Self::Parameters) -> T {
        let eps = F - 1.0;
        0.5 * parameters.young * eps * eps
    }

    fn compute_stress(&self, F: T, parameters: &Self::Parameters) -> T {
        parameters.young * (F - 1.0)
    }

    fn compute_stress_derivative(&self, _F: T, parameters: &Self::Parameters) -> T {
        parameters.young
    }
}

/// The compressible Neo-Hookean material model, restricted to uniaxial deformation.
///
/// The strain energy density is given by
/// $$
/// \psi(F) = \frac{\mu}{2}(F^2 - 1 - 2 \log F) + \frac{\lambda}{2}(\log F)^2,
/// $$
/// so that
/// $$
/// P(F) = \mu \left(F - \frac{1}{F}\right) + \lambda \frac{\log F}{F},
/// \qquad
/// \frac{\mathrm{d}P}{\mathrm{d}F} = \mu \left(1 + \frac{1}{F^2}\right) + \lambda \frac{1 - \log F}{F^2}.
/// $$
/// The model is only defined for $F > 0$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeoHookean1d;

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> HyperelasticMaterial1d<T> for NeoHookean1d {
    type Parameters = LameParameters1d<T>;

    fn compute_energy_density(&self, F: T, parameters: &Self::Parameters) -> T {
        let &LameParameters1d { mu, lambda } = parameters;
        let log_F = F.ln();
        0.5 * mu * (F * F - 1.0 - 2.0 * log_F) + 0.5 * lambda * log_F * log_F
    }

    fn compute_stress(&self, F: T, parameters: &Self::Parameters) -> T {
        let &LameParameters1d { mu, lambda } = parameters;
        mu * (F - 1.0 / F) + lambda * F.ln() / F
    }

    fn compute_stress_derivative(&self, F: T, parameters: &Self::Parameters) -> T {
        let &LameParameters1d { mu, lambda } = parameters;
        let F_squared = F * F;
        mu * (1.0 + 1.0 / F_squared) + lambda * (1.0 - F.ln()) / F_squared
    }

    fn is_admissible(&self, F: T) -> bool {
        F > 0.0
    }
}
