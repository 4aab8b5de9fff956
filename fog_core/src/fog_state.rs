//! Persistent fog and territory state for the observed player.
//!
//! Fog is one byte per low-resolution cell:
//! - `0`: currently visible
//! - `1..=floor`: previously seen, fading toward the remembered floor
//! - `255`: never seen
//!
//! Territory is a monotonic bit per cell that pins fog to `0` until the
//! next observed-player reset.

use std::collections::TryReserveError;

use crate::{accumulator::VisionBuffer, chunks::DirtyChunks, grid::FogGrid};

pub const FOG_VISIBLE: u8 = 0;
pub const FOG_UNSEEN: u8 = u8::MAX;

/// Fixed-size bit array, one bit per low-resolution cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerritoryBits {
    words: Vec<u64>,
    len: usize,
}

impl TerritoryBits {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Like [`TerritoryBits::new`], reporting allocation failure instead of aborting.
    pub fn try_new(len: usize) -> Result<Self, TryReserveError> {
        let word_count = len.div_ceil(64);
        let mut words = Vec::new();
        words.try_reserve_exact(word_count)?;
        words.resize(word_count, 0);
        Ok(Self { words, len })
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Returns `true` if the bit was newly set.
    #[inline]
    pub fn set(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let word = &mut self.words[index / 64];
        let mask = 1u64 << (index % 64);
        let was_set = *word & mask != 0;
        *word |= mask;
        !was_set
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// Per-merge tallies, reported through metrics and tracing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub changed: usize,
    pub visible: usize,
    pub remembered: usize,
    pub unseen: usize,
}

#[derive(Debug, Clone)]
pub struct FogState {
    fog: Vec<u8>,
    territory: TerritoryBits,
    remembered_floor: u8,
    fade_step: u8,
}

impl FogState {
    /// Wraps an already allocated fog buffer; every cell starts unseen. The
    /// territory bits are allocated fallibly to match.
    pub fn try_from_buffer(
        fog: Vec<u8>,
        remembered_floor: u8,
        fade_step: u8,
    ) -> Result<Self, TryReserveError> {
        let territory = TerritoryBits::try_new(fog.len())?;
        Ok(Self::with_parts(fog, territory, remembered_floor, fade_step))
    }

    pub fn new(cells: usize, remembered_floor: u8, fade_step: u8) -> Self {
        Self::with_parts(
            vec![FOG_UNSEEN; cells],
            TerritoryBits::new(cells),
            remembered_floor,
            fade_step,
        )
    }

    fn with_parts(
        mut fog: Vec<u8>,
        territory: TerritoryBits,
        remembered_floor: u8,
        fade_step: u8,
    ) -> Self {
        fog.fill(FOG_UNSEEN);
        Self {
            fog,
            territory,
            remembered_floor,
            fade_step: fade_step.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.fog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fog.is_empty()
    }

    pub fn remembered_floor(&self) -> u8 {
        self.remembered_floor
    }

    /// Returns every cell to "never seen" with no territory, without reallocating.
    pub fn reset(&mut self) {
        self.fog.fill(FOG_UNSEEN);
        self.territory.clear();
    }

    #[inline]
    pub fn fog_at(&self, index: usize) -> u8 {
        self.fog.get(index).copied().unwrap_or(FOG_UNSEEN)
    }

    #[inline]
    pub fn is_territory(&self, index: usize) -> bool {
        self.territory.get(index)
    }

    pub fn territory_count(&self) -> usize {
        self.territory.count_ones()
    }

    pub fn fog(&self) -> &[u8] {
        &self.fog
    }

    /// Permanently reveals a low-resolution cell. Idempotent.
    pub fn claim_territory(&mut self, index: usize, chunks: &mut DirtyChunks) -> bool {
        if index >= self.fog.len() {
            return false;
        }
        let newly_claimed = self.territory.set(index);
        let fog_changed = self.fog[index] != FOG_VISIBLE;
        self.fog[index] = FOG_VISIBLE;
        if newly_claimed || fog_changed {
            chunks.mark_cell_dirty(index);
        }
        newly_claimed
    }

    /// Folds the current vision buffer and ownership into persistent fog.
    ///
    /// Per cell, first match wins: territory, owned by the observed player or a
    /// live ally, currently visible, otherwise fade toward the remembered floor.
    /// Cells that never left `255` stay unseen.
    pub fn merge<F>(
        &mut self,
        grid: &FogGrid,
        vision: &VisionBuffer,
        mut owned_by_alliance: F,
        chunks: &mut DirtyChunks,
    ) -> MergeStats
    where
        F: FnMut(u32, u32) -> bool,
    {
        let low = grid.low_size();
        let floor = self.remembered_floor;
        let step = self.fade_step;
        let visible = vision.cells();
        let mut stats = MergeStats::default();

        for low_y in 0..low.y {
            let row = low_y as usize * low.x as usize;
            for low_x in 0..low.x {
                let index = row + low_x as usize;
                let prior = self.fog[index];
                let next = if self.territory.get(index) {
                    FOG_VISIBLE
                } else {
                    let sample = grid.representative(low_x, low_y);
                    if owned_by_alliance(sample.x, sample.y) || visible[index] {
                        FOG_VISIBLE
                    } else if prior < floor {
                        prior.saturating_add(step).min(floor)
                    } else {
                        prior
                    }
                };

                if next != prior {
                    self.fog[index] = next;
                    chunks.mark_cell_dirty(index);
                    stats.changed += 1;
                }
                match next {
                    FOG_VISIBLE => stats.visible += 1,
                    FOG_UNSEEN => stats.unseen += 1,
                    _ => stats.remembered += 1,
                }
            }
        }

        stats
    }

    /// `#` unseen, `+` remembered or fading, `.` visible, `T` territory.
    pub fn ascii_dump(&self, grid: &FogGrid) -> String {
        let low = grid.low_size();
        let mut out = String::with_capacity((low.x as usize + 1) * low.y as usize);
        for low_y in 0..low.y {
            for low_x in 0..low.x {
                let index = grid.low_index(low_x, low_y);
                let glyph = if self.is_territory(index) {
                    'T'
                } else {
                    match self.fog_at(index) {
                        FOG_VISIBLE => '.',
                        FOG_UNSEEN => '#',
                        _ => '+',
                    }
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::UVec2;

    const FLOOR: u8 = 204;

    fn fixture(size: u32) -> (FogGrid, FogState, VisionBuffer, DirtyChunks) {
        let grid = FogGrid::new(UVec2::splat(size), 1);
        let state = FogState::new(grid.cell_count(), FLOOR, FLOOR);
        let vision = VisionBuffer::new(grid);
        let chunks = DirtyChunks::new(grid.low_size(), 4);
        (grid, state, vision, chunks)
    }

    #[test]
    fn territory_bits_set_once() {
        let mut bits = TerritoryBits::new(130);
        assert!(bits.set(129));
        assert!(!bits.set(129));
        assert!(bits.get(129));
        assert!(!bits.get(128));
        assert!(!bits.set(500));
        assert_eq!(bits.count_ones(), 1);
        bits.clear();
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn territory_allocation_failure_is_reported() {
        assert!(TerritoryBits::try_new(usize::MAX).is_err());
        let bits = TerritoryBits::try_new(130).expect("small bitset");
        assert_eq!(bits, TerritoryBits::new(130));

        let state = FogState::try_from_buffer(vec![0; 70], FLOOR, FLOOR).expect("small state");
        assert!(state.fog().iter().all(|&fog| fog == FOG_UNSEEN));
        assert_eq!(state.territory_count(), 0);
    }

    #[test]
    fn visible_then_hidden_settles_on_floor() {
        let (grid, mut state, mut vision, mut chunks) = fixture(8);
        vision.mark_low(grid.low_index(2, 2));
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(grid.low_index(2, 2)), FOG_VISIBLE);
        assert_eq!(state.fog_at(grid.low_index(5, 5)), FOG_UNSEEN);

        vision.clear();
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(grid.low_index(2, 2)), FLOOR);
        assert_eq!(state.fog_at(grid.low_index(5, 5)), FOG_UNSEEN);

        // Stays on the floor.
        let stats = state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(grid.low_index(2, 2)), FLOOR);
        assert_eq!(stats.changed, 0);
        assert_eq!(stats.remembered, 1);
        assert_eq!(stats.unseen, 63);
    }

    #[test]
    fn gradual_fade_climbs_to_floor() {
        let grid = FogGrid::new(UVec2::splat(4), 1);
        let mut state = FogState::new(grid.cell_count(), FLOOR, 100);
        let mut vision = VisionBuffer::new(grid);
        let mut chunks = DirtyChunks::new(grid.low_size(), 4);
        vision.mark_low(0);
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        vision.clear();

        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(0), 100);
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(0), 200);
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(0), FLOOR);
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(state.fog_at(0), FLOOR);
    }

    #[test]
    fn alliance_ownership_overrides_vision() {
        let (grid, mut state, vision, mut chunks) = fixture(8);
        state.merge(&grid, &vision, |x, y| x < 2 && y < 2, &mut chunks);
        assert_eq!(state.fog_at(grid.low_index(1, 1)), FOG_VISIBLE);
        assert_eq!(state.fog_at(grid.low_index(2, 2)), FOG_UNSEEN);
    }

    #[test]
    fn territory_is_pinned_and_monotonic() {
        let (grid, mut state, vision, mut chunks) = fixture(8);
        let index = grid.low_index(6, 1);
        assert!(state.claim_territory(index, &mut chunks));
        assert!(!state.claim_territory(index, &mut chunks));

        for _ in 0..5 {
            state.merge(&grid, &vision, |_, _| false, &mut chunks);
            assert!(state.is_territory(index));
            assert_eq!(state.fog_at(index), FOG_VISIBLE);
        }
        assert_eq!(state.territory_count(), 1);
    }

    #[test]
    fn changed_cells_mark_their_chunk() {
        let (grid, mut state, mut vision, mut chunks) = fixture(8);
        vision.mark_low(grid.low_index(5, 6));
        state.merge(&grid, &vision, |_, _| false, &mut chunks);

        // 8x8 grid with 4x4 chunks: cell (5, 6) is in chunk 3.
        assert_eq!(chunks.dirty_count(), 1);
        assert!(chunks.is_dirty(3));
        chunks.take_dirty();

        let stats = state.merge(&grid, &vision, |_, _| false, &mut chunks);
        assert_eq!(stats.changed, 0);
        assert!(!chunks.has_dirty_chunks());
    }

    #[test]
    fn reset_restores_unseen_without_territory() {
        let (grid, mut state, mut vision, mut chunks) = fixture(8);
        vision.mark_low(3);
        state.claim_territory(9, &mut chunks);
        state.merge(&grid, &vision, |_, _| true, &mut chunks);

        state.reset();
        assert!(state.fog().iter().all(|&fog| fog == FOG_UNSEEN));
        assert_eq!(state.territory_count(), 0);
    }

    #[test]
    fn ascii_dump_shows_each_state() {
        let (grid, mut state, mut vision, mut chunks) = fixture(3);
        state.claim_territory(grid.low_index(0, 0), &mut chunks);
        vision.mark_low(grid.low_index(1, 0));
        vision.mark_low(grid.low_index(1, 1));
        state.merge(&grid, &vision, |_, _| false, &mut chunks);
        vision.clear();
        vision.mark_low(grid.low_index(1, 0));
        state.merge(&grid, &vision, |_, _| false, &mut chunks);

        insta::assert_snapshot!(state.ascii_dump(&grid), @r"
        T.#
        #+#
        ###
        ");
    }
}
