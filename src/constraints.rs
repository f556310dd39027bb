//! Dirichlet constraints on degrees of freedom.
use nalgebra::{DVectorViewMut, Scalar};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// A fixed mapping from degree-of-freedom indices to prescribed values.
///
/// Entries are kept sorted by index. Inserting an index that is already present replaces its
/// prescribed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(usize, T)>",
    into = "Vec<(usize, T)>",
    bound(serialize = "T: Scalar + Serialize", deserialize = "T: Scalar + Deserialize<'de>")
)]
pub struct ConstraintSet<T> {
    dofs: Vec<usize>,
    values: Vec<T>,
}

impl<T> Default for ConstraintSet<T> {
    fn default() -> Self {
        Self {
            dofs: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T: Scalar> ConstraintSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrains every listed degree of freedom to the same value.
    pub fn uniform(dofs: impl IntoIterator<Item = usize>, value: T) -> Self {
        dofs.into_iter().map(|dof| (dof, value.clone())).collect()
    }

    /// Constrains the degrees of freedom of the given nodes for a field with `solution_dim`
    /// components per node. The value of component `i` at node `n` is given by `value(n, i)`.
    pub fn from_nodes(nodes: &[usize], solution_dim: usize, mut value: impl FnMut(usize, usize) -> T) -> Self {
        let mut constraints = Self::new();
        for &node in nodes {
            for i in 0..solution_dim {
                constraints.insert(solution_dim * node + i, value(node, i));
            }
        }
        constraints
    }

    /// Prescribes `value` for `dof`, replacing any previously prescribed value.
    pub fn insert(&mut self, dof: usize, value: T) {
        match self.dofs.binary_search(&dof) {
            Ok(idx) => self.values[idx] = value,
            Err(idx) => {
                self.dofs.insert(idx, dof);
                self.values.insert(idx, value);
            }
        }
    }

    pub fn with(mut self, dof: usize, value: T) -> Self {
        self.insert(dof, value);
        self
    }

    pub fn len(&self) -> usize {
        self.dofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dofs.is_empty()
    }

    /// The constrained indices, sorted and free of duplicates.
    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn value(&self, dof: usize) -> Option<&T> {
        self.dofs
            .binary_search(&dof)
            .ok()
            .map(|idx| &self.values[idx])
    }

    pub fn contains(&self, dof: usize) -> bool {
        self.dofs.binary_search(&dof).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.dofs.iter().copied().zip(self.values.iter())
    }

    /// Checks that every constrained index refers to one of `num_dofs` degrees of freedom.
    pub fn validate(&self, num_dofs: usize) -> Result<(), InvalidConstraintError> {
        // Sorted, so the last index is the largest
        match self.dofs.last() {
            Some(&dof) if dof >= num_dofs => Err(InvalidConstraintError { dof, num_dofs }),
            _ => Ok(()),
        }
    }

    /// Writes the prescribed values into `field`.
    pub fn apply_to_field<'a>(&self, field: impl Into<DVectorViewMut<'a, T>>) {
        let mut field = field.into();
        for (dof, value) in self.iter() {
            field[dof] = value.clone();
        }
    }

    /// Overwrites the constrained entries of `vector` with `zero`.
    pub fn zero_constrained<'a>(&self, vector: impl Into<DVectorViewMut<'a, T>>, zero: T) {
        let mut vector = vector.into();
        for &dof in &self.dofs {
            vector[dof] = zero.clone();
        }
    }
}

impl<T: Scalar> FromIterator<(usize, T)> for ConstraintSet<T> {
    fn from_iter<I: IntoIterator<Item = (usize, T)>>(iter: I) -> Self {
        let mut constraints = Self::new();
        for (dof, value) in iter {
            constraints.insert(dof, value);
        }
        constraints
    }
}

impl<T: Scalar> From<Vec<(usize, T)>> for ConstraintSet<T> {
    fn from(pairs: Vec<(usize, T)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl<T: Scalar> From<ConstraintSet<T>> for Vec<(usize, T)> {
    fn from(constraints: ConstraintSet<T>) -> Self {
        constraints.dofs.into_iter().zip(constraints.values).collect()
    }
}

/// A constrained index lies outside the valid range of degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidConstraintError {
    pub dof: usize,
    pub num_dofs: usize,
}

impl fmt::Display for InvalidConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Constrained degree of freedom {} is out of bounds for a field with {} degrees of freedom.",
            self.dof, self.num_dofs
        )
    }
}

impl Error for InvalidConstraintError {}
