//! Gauss-Legendre quadrature on the reference segment $[-1, 1]$.
use newton_fem_traits::Real;
use numeric_literals::replace_float_literals;

/// Weights and points of a one-dimensional quadrature rule.
pub type QuadraturePair1d<T> = (Vec<T>, Vec<T>);

/// Returns the Gauss-Legendre rule with the given number of points on $[-1, 1]$.
///
/// A rule with $n$ points integrates polynomials of degree $2n - 1$ exactly.
///
/// # Panics
///
/// Panics unless `1 <= num_points <= 3`.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn gauss<T: Real>(num_points: usize) -> QuadraturePair1d<T> {
    match num_points {
        1 => (vec![2.0], vec![0.0]),
        2 => {
            let a = T::one() / T::sqrt(3.0);
            (vec![1.0, 1.0], vec![-a, a])
        }
        3 => {
            let a = T::sqrt(3.0 / 5.0);
            (vec![5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0], vec![-a, 0.0, a])
        }
        _ => panic!("Gauss rules are only available for 1 to 3 points, got {}", num_points),
    }
}
