//! Overlay rasterization of dirty chunks into a persistent RGBA image.

use std::collections::TryReserveError;

use bevy::math::{UVec2, Vec2};

use crate::{chunks::DirtyChunks, config::OverlayConfig, fog_state::FogState, grid::FogGrid};

/// RGBA8 image with one pixel per low-resolution cell, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FogImage {
    size: UVec2,
    pixels: Vec<u8>,
}

impl FogImage {
    /// Allocates a fully transparent image, reporting allocation failure instead of aborting.
    pub fn try_new(size: UVec2) -> Result<Self, TryReserveError> {
        let len = size.x as usize * size.y as usize * 4;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len)?;
        pixels.resize(len, 0);
        Ok(Self { size, pixels })
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.x || y >= self.size.y {
            return None;
        }
        let offset = (y as usize * self.size.x as usize + x as usize) * 4;
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&self.pixels[offset..offset + 4]);
        Some(rgba)
    }

    #[inline]
    fn put(&mut self, index: usize, rgba: [u8; 4]) {
        let offset = index * 4;
        self.pixels[offset..offset + 4].copy_from_slice(&rgba);
    }
}

/// Where the overlay lands in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayPlacement {
    /// World position of the map's top-left corner.
    pub world_offset: Vec2,
    /// Full-resolution tiles covered by one overlay pixel along each axis.
    pub scale: f32,
}

impl OverlayPlacement {
    /// Map centred on the world origin.
    pub fn centered(grid: &FogGrid) -> Self {
        let full = grid.full_size();
        Self {
            world_offset: Vec2::new(-(full.x as f32) / 2.0, -(full.y as f32) / 2.0),
            scale: grid.scale() as f32,
        }
    }
}

/// Output target supplied by the host's render pipeline.
pub trait FogSurface {
    fn composite(&mut self, image: &FogImage, placement: OverlayPlacement);
}

/// Converts fog and territory state into overlay pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRasterizer {
    fog_rgb: [u8; 3],
    territory_rgba: [u8; 4],
}

impl OverlayRasterizer {
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            fog_rgb: config.fog_rgb,
            territory_rgba: config.territory_rgba,
        }
    }

    /// Territory gets its tint; everything else is the fog colour with alpha equal
    /// to the fog byte, so visible cells are fully transparent.
    #[inline]
    pub fn cell_color(&self, fog: u8, territory: bool) -> [u8; 4] {
        if territory {
            self.territory_rgba
        } else {
            let [r, g, b] = self.fog_rgb;
            [r, g, b, fog]
        }
    }

    /// Repaints every dirty chunk and clears its flag. Clean chunks keep their
    /// previous pixels. Returns the number of chunks repainted.
    pub fn rasterize(
        &self,
        grid: &FogGrid,
        state: &FogState,
        chunks: &mut DirtyChunks,
        image: &mut FogImage,
    ) -> usize {
        let dirty = chunks.take_dirty();
        for chunk in &dirty {
            for low_y in chunk.min.y..chunk.max.y {
                for low_x in chunk.min.x..chunk.max.x {
                    let index = grid.low_index(low_x, low_y);
                    let rgba = self.cell_color(state.fog_at(index), state.is_territory(index));
                    image.put(index, rgba);
                }
            }
        }
        dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{accumulator::VisionBuffer, fog_state::FOG_UNSEEN};

    fn rasterizer() -> OverlayRasterizer {
        OverlayRasterizer::new(&OverlayConfig::default())
    }

    #[test]
    fn colours_follow_fog_and_territory() {
        let raster = rasterizer();
        assert_eq!(raster.cell_color(0, false), [0, 0, 0, 0]);
        assert_eq!(raster.cell_color(204, false), [0, 0, 0, 204]);
        assert_eq!(raster.cell_color(FOG_UNSEEN, false), [0, 0, 0, 255]);
        assert_eq!(raster.cell_color(0, true), [40, 120, 255, 48]);
    }

    #[test]
    fn only_dirty_chunks_are_repainted() {
        let grid = FogGrid::new(UVec2::splat(8), 1);
        let mut state = FogState::new(grid.cell_count(), 204, 204);
        let mut chunks = DirtyChunks::new(grid.low_size(), 4);
        let mut image = FogImage::try_new(grid.low_size()).expect("small image");
        let raster = rasterizer();

        chunks.mark_all_dirty();
        assert_eq!(raster.rasterize(&grid, &state, &mut chunks, &mut image), 4);
        assert_eq!(image.pixel(7, 7), Some([0, 0, 0, 255]));

        // Change a cell in chunk 0 and one in chunk 3, but only report chunk 0.
        let mut vision = VisionBuffer::new(grid);
        vision.mark_low(grid.low_index(1, 1));
        vision.mark_low(grid.low_index(6, 6));
        let mut scratch = DirtyChunks::new(grid.low_size(), 4);
        state.merge(&grid, &vision, |_, _| false, &mut scratch);
        chunks.mark_cell_dirty(grid.low_index(1, 1));

        assert_eq!(raster.rasterize(&grid, &state, &mut chunks, &mut image), 1);
        assert_eq!(image.pixel(1, 1), Some([0, 0, 0, 0]));
        // Chunk 3 was clean, so its stale pixel is left alone.
        assert_eq!(image.pixel(6, 6), Some([0, 0, 0, 255]));
        assert!(!chunks.has_dirty_chunks());
    }

    #[test]
    fn placement_centres_the_map() {
        let grid = FogGrid::new(UVec2::new(200, 100), 2);
        let placement = OverlayPlacement::centered(&grid);
        assert_eq!(placement.world_offset, Vec2::new(-100.0, -50.0));
        assert_eq!(placement.scale, 2.0);
    }

    #[test]
    fn pixel_lookup_is_bounds_checked() {
        let image = FogImage::try_new(UVec2::new(2, 2)).expect("tiny image");
        assert_eq!(image.pixels().len(), 16);
        assert_eq!(image.pixel(2, 0), None);
    }
}
