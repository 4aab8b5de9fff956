//! Full-resolution to low-resolution coordinate mapping.

use bevy::math::UVec2;

use crate::game::TileRef;

/// Maps full-resolution tile coordinates onto the coarser fog grid.
///
/// Every conversion clamps into the grid, so any input yields a valid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FogGrid {
    full: UVec2,
    low: UVec2,
    scale: u32,
}

impl FogGrid {
    /// `full` must be non-zero in both axes; `scale` below 1 is treated as 1.
    pub fn new(full: UVec2, scale: u32) -> Self {
        let scale = scale.max(1);
        let low = UVec2::new(full.x.div_ceil(scale), full.y.div_ceil(scale));
        Self { full, low, scale }
    }

    #[inline]
    pub fn full_size(&self) -> UVec2 {
        self.full
    }

    #[inline]
    pub fn low_size(&self) -> UVec2 {
        self.low
    }

    #[inline]
    pub fn scale(&self) -> u32 {
        self.scale
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.low.x as usize * self.low.y as usize
    }

    #[inline]
    pub fn contains_full(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.full.x as i64 && y < self.full.y as i64
    }

    #[inline]
    pub fn to_low(&self, x: u32, y: u32) -> UVec2 {
        UVec2::new(
            (x / self.scale).min(self.low.x.saturating_sub(1)),
            (y / self.scale).min(self.low.y.saturating_sub(1)),
        )
    }

    #[inline]
    pub fn low_index(&self, low_x: u32, low_y: u32) -> usize {
        let x = low_x.min(self.low.x.saturating_sub(1)) as usize;
        let y = low_y.min(self.low.y.saturating_sub(1)) as usize;
        y * self.low.x as usize + x
    }

    /// Low-resolution index of a full-resolution coordinate.
    #[inline]
    pub fn full_to_low_index(&self, x: u32, y: u32) -> usize {
        let low = self.to_low(x, y);
        low.y as usize * self.low.x as usize + low.x as usize
    }

    #[inline]
    pub fn full_index_to_low_index(&self, tile: TileRef) -> usize {
        self.full_to_low_index(tile.x(self.full.x), tile.y(self.full.x))
    }

    #[inline]
    pub fn low_coords(&self, index: usize) -> UVec2 {
        let width = self.low.x as usize;
        UVec2::new((index % width) as u32, (index / width) as u32)
    }

    /// Full-resolution cell sampled to stand in for a whole low-resolution bucket.
    #[inline]
    pub fn representative(&self, low_x: u32, low_y: u32) -> UVec2 {
        UVec2::new(
            (low_x * self.scale).min(self.full.x.saturating_sub(1)),
            (low_y * self.scale).min(self.full.y.saturating_sub(1)),
        )
    }
}
