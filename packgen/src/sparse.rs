//! Sparse symmetric matrices and the pluggable SPD solver boundary.

use crate::error::{Error, Result};
use ndarray::Array1;

/// Compressed-sparse-row symmetric matrix assembled from triplets.
///
/// Both halves of each off-diagonal entry are stored explicitly, which
/// keeps the matrix-vector product branch-free.
#[derive(Clone, Debug)]
pub struct SparseSymMatrix {
    dimension: usize,
    row_offsets: Vec<usize>,
    columns: Vec<usize>,
    values: Vec<f64>,
}

impl SparseSymMatrix {
    /// Assembles a matrix from `(row, column, value)` triplets; duplicate
    /// coordinates are summed.
    #[must_use]
    pub fn from_triplets(dimension: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut row_counts = vec![0_usize; dimension];
        for &(row, _, _) in triplets {
            row_counts[row] += 1;
        }

        let mut row_offsets = vec![0_usize; dimension + 1];
        for row in 0..dimension {
            row_offsets[row + 1] = row_offsets[row] + row_counts[row];
        }

        let mut columns = vec![0_usize; triplets.len()];
        let mut values = vec![0.0; triplets.len()];
        let mut cursor = row_offsets.clone();
        for &(row, column, value) in triplets {
            columns[cursor[row]] = column;
            values[cursor[row]] = value;
            cursor[row] += 1;
        }

        // Sum duplicates within each row.
        let mut matrix = Self {
            dimension,
            row_offsets,
            columns,
            values,
        };
        matrix.merge_duplicates();
        matrix
    }

    fn merge_duplicates(&mut self) {
        let mut merged_columns = Vec::with_capacity(self.columns.len());
        let mut merged_values = Vec::with_capacity(self.values.len());
        let mut merged_offsets = vec![0_usize; self.dimension + 1];

        for row in 0..self.dimension {
            let range = self.row_offsets[row]..self.row_offsets[row + 1];
            let mut entries: Vec<(usize, f64)> = self.columns[range.clone()]
                .iter()
                .copied()
                .zip(self.values[range].iter().copied())
                .collect();
            entries.sort_unstable_by_key(|&(column, _)| column);

            for (column, value) in entries {
                if merged_columns.len() > merged_offsets[row]
                    && *merged_columns.last().expect("non-empty") == column
                {
                    *merged_values.last_mut().expect("non-empty") += value;
                } else {
                    merged_columns.push(column);
                    merged_values.push(value);
                }
            }
            merged_offsets[row + 1] = merged_columns.len();
        }

        self.columns = merged_columns;
        self.values = merged_values;
        self.row_offsets = merged_offsets;
    }

    /// Returns the matrix dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Computes `self * x`.
    #[must_use]
    pub fn multiply(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut result = Array1::zeros(self.dimension);
        for row in 0..self.dimension {
            let mut sum = 0.0;
            for position in self.row_offsets[row]..self.row_offsets[row + 1] {
                sum += self.values[position] * x[self.columns[position]];
            }
            result[row] = sum;
        }
        result
    }
}

/// Solver boundary for symmetric positive-definite systems; implementations
/// are swappable per the engine wiring.
pub trait SparseSpdSolver {
    /// Solves `matrix * x = rhs`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Convergence`] if the iteration fails to reach the
    /// configured tolerance.
    fn solve(&self, matrix: &SparseSymMatrix, rhs: &Array1<f64>) -> Result<Array1<f64>>;
}

/// Plain conjugate gradients without preconditioning. Direct factorizations
/// are far slower on the jamming systems (tens of thousands of bonds with
/// ~4.5 bond pairs each), so CG is the default.
#[derive(Clone, Copy, Debug)]
pub struct ConjugateGradientSolver {
    /// Relative residual tolerance.
    pub tolerance: f64,
    /// Iteration cap as a multiple of the system dimension.
    pub max_iteration_factor: usize,
}

impl Default for ConjugateGradientSolver {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iteration_factor: 10,
        }
    }
}

impl SparseSpdSolver for ConjugateGradientSolver {
    fn solve(&self, matrix: &SparseSymMatrix, rhs: &Array1<f64>) -> Result<Array1<f64>> {
        let dimension = matrix.dimension();
        let mut x = Array1::zeros(dimension);
        if dimension == 0 {
            return Ok(x);
        }

        let rhs_norm_squared = rhs.dot(rhs);
        if rhs_norm_squared == 0.0 {
            return Ok(x);
        }
        let threshold = self.tolerance * self.tolerance * rhs_norm_squared;

        let mut residual = rhs.clone();
        let mut direction = residual.clone();
        let mut residual_norm_squared = residual.dot(&residual);

        let max_iterations = self.max_iteration_factor * dimension.max(1);
        for _ in 0..max_iterations {
            if residual_norm_squared <= threshold {
                return Ok(x);
            }
            let matrix_direction = matrix.multiply(&direction);
            let curvature = direction.dot(&matrix_direction);
            if curvature <= 0.0 {
                return Err(Error::Convergence(
                    "bond matrix is not positive definite".into(),
                ));
            }
            let alpha = residual_norm_squared / curvature;
            x = &x + &(alpha * &direction);
            residual = &residual - &(alpha * &matrix_direction);

            let next_norm_squared = residual.dot(&residual);
            let beta = next_norm_squared / residual_norm_squared;
            direction = &residual + &(beta * &direction);
            residual_norm_squared = next_norm_squared;
        }

        if residual_norm_squared <= threshold {
            Ok(x)
        } else {
            Err(Error::Convergence(format!(
                "conjugate gradients stalled at relative residual {:.3e}",
                (residual_norm_squared / rhs_norm_squared).sqrt()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn duplicates_are_summed() {
        let matrix =
            SparseSymMatrix::from_triplets(2, &[(0, 0, 1.0), (0, 0, 1.0), (1, 1, 3.0)]);
        let product = matrix.multiply(&array![1.0, 1.0]);
        assert_approx_eq!(f64, product[0], 2.0, ulps = 2);
        assert_approx_eq!(f64, product[1], 3.0, ulps = 2);
    }

    #[test]
    fn solves_a_known_spd_system() {
        // [[4, 1, 0], [1, 3, 1], [0, 1, 2]] x = [1, 2, 3]
        let triplets = [
            (0, 0, 4.0),
            (1, 1, 3.0),
            (2, 2, 2.0),
            (0, 1, 1.0),
            (1, 0, 1.0),
            (1, 2, 1.0),
            (2, 1, 1.0),
        ];
        let matrix = SparseSymMatrix::from_triplets(3, &triplets);
        let rhs = array![1.0, 2.0, 3.0];

        let solution = ConjugateGradientSolver::default()
            .solve(&matrix, &rhs)
            .unwrap();

        let product = matrix.multiply(&solution);
        for (lhs, rhs) in product.iter().zip(rhs.iter()) {
            assert_approx_eq!(f64, *lhs, *rhs, epsilon = 1e-9);
        }
    }

    #[test]
    fn indefinite_systems_are_rejected() {
        let matrix = SparseSymMatrix::from_triplets(2, &[(0, 0, -1.0), (1, 1, 1.0)]);
        let rhs = array![1.0, 1.0];
        assert!(ConjugateGradientSolver::default().solve(&matrix, &rhs).is_err());
    }
}
