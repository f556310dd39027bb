use nalgebra::{DVector, RealField};

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Estimates the order $p$ of convergence of an error sequence satisfying
/// $e_{k+1} \approx C e_k^p$.
///
/// The order is the slope of the least-squares line through the points
/// $(\log e_k, \log e_{k + 1})$. Errors that are not strictly positive are ignored, together with
/// everything after them.
///
/// # Panics
///
/// Panics if fewer than two pairs of errors remain.
pub fn estimate_convergence_order<T: RealField + Copy>(errors: &[T]) -> T {
    let log_errors: Vec<T> = errors
        .iter()
        .take_while(|&&e| e > T::zero())
        .map(|e| e.ln())
        .collect();
    assert!(
        log_errors.len() >= 3,
        "Need at least three positive errors to estimate convergence order."
    );

    let x = DVector::from_column_slice(&log_errors[..log_errors.len() - 1]);
    let y = DVector::from_column_slice(&log_errors[1..]);
    let n = T::from_usize(x.len()).expect("Number of errors must fit in T");
    let x_mean = x.sum() / n;
    let y_mean = y.sum() / n;
    let dx = x.add_scalar(-x_mean);
    let dy = y.add_scalar(-y_mean);
    dx.dot(&dy) / dx.dot(&dx)
}

/// Checks that `values` is non-increasing, allowing each step to grow by at most `rel_tol`
/// relative to the previous value.
pub fn is_monotonically_decreasing<T: RealField + Copy>(values: impl IntoIterator<Item = T>, rel_tol: T) -> bool {
    let values: Vec<T> = values.into_iter().collect();
    values
        .windows(2)
        .all(|pair| pair[1] <= pair[0] * (T::one() + rel_tol))
}
