use ndarray::{Array3, ShapeBuilder, ShapeError};

/// Reshape of a flat, column-major voxel buffer followed by an axis
/// permutation. `permutation[k]` names the declared axis that becomes
/// output axis `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisReorder {
    pub permutation: [usize; 3],
}

impl AxisReorder {
    /// Declared (x, y, z) with x varying fastest, to (slice, row, column) =
    /// (z, y, x).
    pub const SLICE_ROW_COLUMN: Self = Self {
        permutation: [2, 1, 0],
    };

    pub fn output_shape(&self, declared: [usize; 3]) -> [usize; 3] {
        self.permutation.map(|axis| declared[axis])
    }

    /// Build the reordered grid. The result is always in standard
    /// (row-major) layout.
    pub fn apply<T: Clone>(
        &self,
        declared: [usize; 3],
        samples: Vec<T>,
    ) -> Result<Array3<T>, ShapeError> {
        let array = Array3::from_shape_vec(declared.f(), samples)?;
        let permuted = array.permuted_axes(self.permutation);
        if permuted.is_standard_layout() {
            Ok(permuted)
        } else {
            Ok(permuted.as_standard_layout().into_owned())
        }
    }
}
