use crate::error::{FieldError, FieldResult};
use nalgebra::DMatrix;

/// Pairwise coupling coefficients between fields.
///
/// Holds the dense `N x N` table together with a per-row list of the non-zero
/// off-diagonal entries, which is what the step update walks. Diagonal entries
/// are kept in the table but never produce an edge: `c_ii * (u_i - u_i)` is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingMatrix {
    table: DMatrix<f64>,
    edges: Vec<Vec<(usize, f64)>>,
}

impl CouplingMatrix {
    /// Builds the matrix from rows, checking that it is `expected x expected`.
    pub fn from_rows(rows: &[Vec<f64>], expected: usize) -> FieldResult<Self> {
        if rows.len() != expected {
            return Err(FieldError::config(format!(
                "Incorrect coupling size. Need {expected} rows, found {}.",
                rows.len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != expected {
                return Err(FieldError::config(format!(
                    "Incorrect coupling size. Row {i} has {} entries, need {expected}.",
                    row.len()
                )));
            }
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::from_row_major(expected, &flat)
    }

    /// Builds the matrix from a row-major flat buffer of length `n * n`.
    pub fn from_row_major(n: usize, flat: &[f64]) -> FieldResult<Self> {
        if n == 0 {
            return Err(FieldError::config("Coupling matrix must not be empty."));
        }
        if flat.len() != n * n {
            return Err(FieldError::config(format!(
                "Incorrect coupling size. Need {} entries for {n} fields, found {}.",
                n * n,
                flat.len()
            )));
        }
        if let Some(pos) = flat.iter().position(|c| !c.is_finite()) {
            return Err(FieldError::config(format!(
                "Coupling entry ({}, {}) is not finite.",
                pos / n,
                pos % n
            )));
        }

        let table = DMatrix::from_row_slice(n, n, flat);
        let edges = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| j != i && table[(i, j)] != 0.0)
                    .map(|j| (j, table[(i, j)]))
                    .collect()
            })
            .collect();

        Ok(Self { table, edges })
    }

    pub fn size(&self) -> usize {
        self.table.nrows()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.table[(i, j)]
    }

    /// Non-zero off-diagonal `(j, c_ij)` pairs of row `i`.
    pub fn edges(&self, i: usize) -> &[(usize, f64)] {
        &self.edges[i]
    }

    pub fn is_symmetric(&self) -> bool {
        self.table == self.table.transpose()
    }

    /// Coupling contribution `sum_j c_ij (u_j - u_i)` at a single sample,
    /// where `value_of(j)` yields field `j` at that sample.
    pub fn mix(&self, i: usize, value_of: impl Fn(usize) -> f64) -> f64 {
        let own = value_of(i);
        self.edges[i]
            .iter()
            .map(|&(j, w)| w * (value_of(j) - own))
            .sum()
    }
}
