use crate::error::{FieldError, FieldResult};

/// Symmetric one-dimensional grid with unit spacing, centred at zero.
///
/// Sample `k` sits at `k - (len - 1) / 2`, so a grid of 100 samples spans
/// `[-49.5, 49.5]` and a grid of 5 samples spans `[-2, 2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    positions: Vec<f64>,
}

impl SpatialGrid {
    pub fn new(len: usize) -> FieldResult<Self> {
        if len == 0 {
            return Err(FieldError::config("grid_size must be at least 1."));
        }
        let offset = (len as f64 - 1.0) / 2.0;
        let positions = (0..len).map(|k| k as f64 - offset).collect();
        Ok(Self { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn spacing(&self) -> f64 {
        1.0
    }

    /// Indices of the domain edge samples. One index when the grid has a single sample.
    pub fn boundary_indices(&self) -> impl Iterator<Item = usize> {
        let last = self.positions.len() - 1;
        std::iter::once(0).chain((last > 0).then_some(last))
    }

    /// Indices strictly between the two edges.
    pub fn interior(&self) -> std::ops::Range<usize> {
        1..self.positions.len().saturating_sub(1).max(1)
    }

    pub fn is_boundary(&self, index: usize) -> bool {
        index == 0 || index + 1 == self.positions.len()
    }
}
