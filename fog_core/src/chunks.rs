//! Dirty-chunk tracking over the low-resolution fog grid.

use bevy::math::UVec2;

/// Rectangular block of low-resolution cells that is re-rasterized as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FogChunk {
    /// Inclusive top-left low-resolution cell.
    pub min: UVec2,
    /// Exclusive bottom-right low-resolution cell.
    pub max: UVec2,
    pub dirty: bool,
}

impl FogChunk {
    pub fn contains(&self, cell: UVec2) -> bool {
        cell.x >= self.min.x && cell.y >= self.min.y && cell.x < self.max.x && cell.y < self.max.y
    }
}

/// Fixed partition of the low-resolution grid into chunks with a dirty flag each.
///
/// A chunk may be flagged without any of its cells having changed; a changed
/// cell is never left in a clean chunk.
#[derive(Debug, Clone)]
pub struct DirtyChunks {
    low: UVec2,
    chunk_size: u32,
    chunks_per_row: u32,
    chunks: Vec<FogChunk>,
    dirty_count: usize,
}

impl DirtyChunks {
    pub fn new(low: UVec2, chunk_size: u32) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks_per_row = low.x.div_ceil(chunk_size);
        let chunks_per_col = low.y.div_ceil(chunk_size);
        let mut chunks = Vec::with_capacity((chunks_per_row * chunks_per_col) as usize);
        for cy in 0..chunks_per_col {
            for cx in 0..chunks_per_row {
                let min = UVec2::new(cx * chunk_size, cy * chunk_size);
                let max = (min + UVec2::splat(chunk_size)).min(low);
                chunks.push(FogChunk {
                    min,
                    max,
                    dirty: false,
                });
            }
        }
        Self {
            low,
            chunk_size,
            chunks_per_row,
            chunks,
            dirty_count: 0,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, index: usize) -> Option<&FogChunk> {
        self.chunks.get(index)
    }

    #[inline]
    pub fn chunk_of_cell(&self, low_index: usize) -> usize {
        let width = self.low.x.max(1) as usize;
        let x = (low_index % width) as u32;
        let y = (low_index / width) as u32;
        let chunk = (y / self.chunk_size) * self.chunks_per_row + x / self.chunk_size;
        (chunk as usize).min(self.chunks.len().saturating_sub(1))
    }

    #[inline]
    pub fn mark_cell_dirty(&mut self, low_index: usize) {
        let chunk = self.chunk_of_cell(low_index);
        self.mark_chunk_dirty(chunk);
    }

    #[inline]
    fn mark_chunk_dirty(&mut self, chunk: usize) {
        if let Some(entry) = self.chunks.get_mut(chunk) {
            if !entry.dirty {
                entry.dirty = true;
                self.dirty_count += 1;
            }
        }
    }

    pub fn mark_all_dirty(&mut self) {
        for chunk in &mut self.chunks {
            chunk.dirty = true;
        }
        self.dirty_count = self.chunks.len();
    }

    #[inline]
    pub fn has_dirty_chunks(&self) -> bool {
        self.dirty_count > 0
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    pub fn is_dirty(&self, chunk: usize) -> bool {
        self.chunks.get(chunk).is_some_and(|entry| entry.dirty)
    }

    /// Clears every dirty flag and returns the chunks that were dirty.
    pub fn take_dirty(&mut self) -> Vec<FogChunk> {
        if self.dirty_count == 0 {
            return Vec::new();
        }
        let mut taken = Vec::with_capacity(self.dirty_count);
        for chunk in &mut self.chunks {
            if chunk.dirty {
                chunk.dirty = false;
                taken.push(chunk.clone());
            }
        }
        self.dirty_count = 0;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_grid_with_clipped_edges() {
        let chunks = DirtyChunks::new(UVec2::new(40, 20), 16);
        assert_eq!(chunks.len(), 3 * 2);
        let last = chunks.chunk(5).expect("last chunk");
        assert_eq!(last.min, UVec2::new(32, 16));
        assert_eq!(last.max, UVec2::new(40, 20));
    }

    #[test]
    fn marking_a_cell_flags_only_its_chunk() {
        let mut chunks = DirtyChunks::new(UVec2::new(40, 20), 16);
        assert!(!chunks.has_dirty_chunks());

        // Cell (17, 3) lives in chunk (1, 0).
        chunks.mark_cell_dirty(3 * 40 + 17);
        assert!(chunks.has_dirty_chunks());
        assert!(chunks.is_dirty(1));
        assert!(!chunks.is_dirty(0));

        // Repeated marks are counted once.
        chunks.mark_cell_dirty(4 * 40 + 18);
        assert_eq!(chunks.dirty_count(), 1);
    }

    #[test]
    fn take_dirty_clears_flags() {
        let mut chunks = DirtyChunks::new(UVec2::new(32, 32), 16);
        chunks.mark_cell_dirty(0);
        chunks.mark_cell_dirty(31 * 32 + 31);

        let taken = chunks.take_dirty();
        assert_eq!(taken.len(), 2);
        assert!(taken[1].contains(UVec2::new(31, 31)));
        assert!(!chunks.has_dirty_chunks());
        assert!(chunks.take_dirty().is_empty());
    }

    #[test]
    fn mark_all_dirty_flags_every_chunk() {
        let mut chunks = DirtyChunks::new(UVec2::new(50, 50), 16);
        chunks.mark_all_dirty();
        assert_eq!(chunks.dirty_count(), chunks.len());
        assert_eq!(chunks.take_dirty().len(), 16);
    }
}
