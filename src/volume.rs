use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

/// Dense voxel grid indexed `[slice, row, column]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelGrid {
    data: Array3<u16>,
}

impl VoxelGrid {
    pub fn new(data: Array3<u16>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the grid (slices, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn num_slices(&self) -> usize {
        self.data.dim().0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<u16> {
        self.data
    }

    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, u16>> {
        (index < self.num_slices()).then(|| self.data.slice(s![index, .., ..]))
    }

    /// Render one slice as an 8-bit grayscale image, windowed to the
    /// slice's own value range.
    pub fn slice_preview(&self, index: usize) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let slice = self.slice(index)?;
        let (height, width) = slice.dim();
        let (min, max) = slice
            .iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max.saturating_sub(min).max(1) as f32;

        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| Self::window_to_u8(v, min, range))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    #[inline]
    fn window_to_u8(value: u16, min: u16, range: f32) -> u8 {
        ((value.saturating_sub(min) as f32 / range) * 255.0).clamp(0.0, 255.0) as u8
    }
}
