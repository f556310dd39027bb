//! A uniform mesh of the interval $[a, b]$ with linear segment elements.
use itertools::Itertools;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use newton_fem_traits::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// A two-node segment with linear Lagrange basis functions.
///
/// The reference segment is $[-1, 1]$, with basis functions
/// $N_0 = (1 - \xi) / 2$ and $N_1 = (1 + \xi) / 2$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment2<T> {
    pub vertices: [T; 2],
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
impl<T: Real> Segment2<T> {
    pub fn length(&self) -> T {
        self.vertices[1] - self.vertices[0]
    }

    /// The determinant of the reference-to-physical map, $\mathrm{d}x / \mathrm{d}\xi$.
    pub fn reference_jacobian(&self) -> T {
        0.5 * self.length()
    }

    pub fn map_reference_coords(&self, xi: T) -> T {
        let [n0, n1] = self.evaluate_basis(xi);
        n0 * self.vertices[0] + n1 * self.vertices[1]
    }

    pub fn evaluate_basis(&self, xi: T) -> [T; 2] {
        [0.5 * (1.0 - xi), 0.5 * (1.0 + xi)]
    }

    /// Derivatives of the basis functions with respect to the physical coordinate.
    ///
    /// These are constant over the element.
    pub fn basis_gradients(&self) -> [T; 2] {
        let h = self.length();
        [-1.0 / h, 1.0 / h]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniformIntervalMesh<T> {
    vertices: Vec<T>,
}

impl<T: Real> UniformIntervalMesh<T> {
    /// Creates a mesh of $[a, b]$ with `num_cells` cells of equal length.
    ///
    /// # Panics
    ///
    /// Panics if `num_cells` is zero or `b <= a`.
    pub fn new(a: T, b: T, num_cells: usize) -> Self {
        assert!(num_cells > 0, "Mesh must have at least one cell");
        assert!(b > a, "Interval must have positive length");
        let n = T::from_usize(num_cells).expect("Number of cells must fit in T");
        let h = (b - a) / n;
        let vertices = (0..=num_cells)
            .map(|i| {
                let i = T::from_usize(i).expect("Vertex index must fit in T");
                a + i * h
            })
            .collect();
        Self { vertices }
    }

    pub fn vertices(&self) -> &[T] {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.vertices.len() - 1
    }

    /// The indices of the vertices at $a$ and $b$.
    pub fn boundary_vertices(&self) -> [usize; 2] {
        [0, self.num_vertices() - 1]
    }

    /// Iterates over cells as pairs of vertex indices and the corresponding element.
    pub fn cell_iter(&self) -> impl '_ + Iterator<Item = ([usize; 2], Segment2<T>)> {
        self.vertices
            .iter()
            .copied()
            .tuple_windows()
            .enumerate()
            .map(|(i, (x0, x1))| ([i, i + 1], Segment2 { vertices: [x0, x1] }))
    }

    /// Evaluates `f` at every vertex.
    pub fn interpolate(&self, f: impl Fn(T) -> T) -> DVector<T> {
        DVector::from_iterator(self.num_vertices(), self.vertices.iter().map(|&x| f(x)))
    }

    /// Creates a CSR matrix with the sparsity pattern of a scalar field on this mesh, with
    /// `solution_dim` components per vertex. All values are zero.
    pub fn create_csr_matrix(&self, solution_dim: usize) -> CsrMatrix<T> {
        let n = self.num_vertices();
        let d = solution_dim;
        let mut offsets = Vec::with_capacity(d * n + 1);
        let mut col_indices = Vec::new();
        offsets.push(0);
        for vertex in 0..n {
            // Vertices coupled to this vertex through a shared cell
            let first = vertex.saturating_sub(1);
            let last = (vertex + 1).min(n - 1);
            for _ in 0..d {
                col_indices.extend((d * first)..(d * (last + 1)));
                offsets.push(col_indices.len());
            }
        }
        let values = vec![T::zero(); col_indices.len()];
        CsrMatrix::try_from_csr_data(d * n, d * n, offsets, col_indices, values)
            .expect("Interval mesh connectivity always yields a valid CSR pattern")
    }
}
