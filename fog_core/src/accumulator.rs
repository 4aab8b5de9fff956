//! Per-update visibility accumulation.
//!
//! Every vision update clears the buffer and stamps each active source's disk
//! into it, in priority order: fixed structures, then border tiles, then mobile
//! units. Later passes use earlier coverage to skip redundant work.

use bevy::math::UVec2;

use crate::{grid::FogGrid, vision::VisionSource};

/// Transient "visible this update" flag per low-resolution cell.
#[derive(Debug, Clone)]
pub struct VisionBuffer {
    grid: FogGrid,
    cells: Vec<bool>,
}

impl VisionBuffer {
    pub fn new(grid: FogGrid) -> Self {
        Self::with_cells(grid, vec![false; grid.cell_count()])
    }

    /// Wraps an already allocated buffer; it is cleared before use.
    pub fn with_cells(grid: FogGrid, mut cells: Vec<bool>) -> Self {
        cells.clear();
        cells.resize(grid.cell_count(), false);
        Self { grid, cells }
    }

    pub fn grid(&self) -> &FogGrid {
        &self.grid
    }

    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    pub fn clear(&mut self) {
        self.cells.fill(false);
    }

    #[inline]
    pub fn is_visible(&self, low_index: usize) -> bool {
        self.cells.get(low_index).copied().unwrap_or(false)
    }

    #[inline]
    pub fn mark_low(&mut self, low_index: usize) {
        if let Some(cell) = self.cells.get_mut(low_index) {
            *cell = true;
        }
    }

    pub fn visible_count(&self) -> usize {
        self.cells.iter().filter(|&&cell| cell).count()
    }

    /// Marks every low-resolution cell covered by the disk of `radius` full-resolution
    /// tiles around `center`. Returns how many cells became visible.
    pub fn stamp_disk(&mut self, center: UVec2, radius: u32) -> usize {
        let low_width = self.grid.low_size().x as usize;
        let cells = &mut self.cells;
        let mut newly_visible = 0;
        for_each_disk_row(&self.grid, center, radius, |low_y, x0, x1| {
            let row = low_y as usize * low_width;
            for cell in &mut cells[row + x0 as usize..=row + x1 as usize] {
                if !*cell {
                    *cell = true;
                    newly_visible += 1;
                }
            }
        });
        newly_visible
    }

    /// Fraction of the disk's low-resolution cells that are already visible.
    /// A disk that covers no cells counts as fully visible.
    pub fn disk_coverage(&self, center: UVec2, radius: u32) -> f32 {
        let low_width = self.grid.low_size().x as usize;
        let mut total = 0usize;
        let mut visible = 0usize;
        for_each_disk_row(&self.grid, center, radius, |low_y, x0, x1| {
            let row = low_y as usize * low_width;
            let span = &self.cells[row + x0 as usize..=row + x1 as usize];
            total += span.len();
            visible += span.iter().filter(|&&cell| cell).count();
        });
        if total == 0 {
            1.0
        } else {
            visible as f32 / total as f32
        }
    }
}

/// Largest `m` with `m * m <= value`.
#[inline]
fn floor_sqrt(value: i128) -> i128 {
    if value <= 0 {
        return 0;
    }
    let mut root = (value as f64).sqrt() as i128;
    while root * root > value {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= value {
        root += 1;
    }
    root
}

/// Walks the discrete disk row by row and reports, per low-resolution row, the
/// inclusive low-resolution column span it covers.
///
/// Rows of the disk are centred on the same column, so the union of the full
/// rows that fall into one low row is the widest of them.
fn for_each_disk_row<F>(grid: &FogGrid, center: UVec2, radius: u32, mut visit: F)
where
    F: FnMut(u32, u32, u32),
{
    let full = grid.full_size();
    // Any disk reaching past width + height already covers the whole map.
    let r = (radius as i64).min(full.x as i64 + full.y as i64);
    let cx = center.x as i64;
    let cy = center.y as i64;
    let dy_min = (-r).max(-cy);
    let dy_max = r.min(full.y as i64 - 1 - cy);
    let mut pending: Option<(u32, u32, u32)> = None;

    for dy in dy_min..=dy_max {
        let y = cy + dy;
        let max_dx = floor_sqrt((r as i128).pow(2) - (dy as i128).pow(2)) as i64;
        let x0 = (cx - max_dx).max(0);
        let x1 = (cx + max_dx).min(full.x as i64 - 1);
        if x0 > x1 {
            continue;
        }
        let start = grid.to_low(x0 as u32, y as u32);
        let end = grid.to_low(x1 as u32, y as u32);
        pending = match pending {
            Some((low_y, lo, hi)) if low_y == start.y => {
                Some((low_y, lo.min(start.x), hi.max(end.x)))
            }
            Some((low_y, lo, hi)) => {
                visit(low_y, lo, hi);
                Some((start.y, start.x, end.x))
            }
            None => Some((start.y, start.x, end.x)),
        };
    }

    if let Some((low_y, lo, hi)) = pending {
        visit(low_y, lo, hi);
    }
}

/// Counters for one accumulation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulateStats {
    pub fixed: usize,
    pub border: usize,
    pub border_skipped: usize,
    pub mobile: usize,
    pub mobile_skipped: usize,
}

/// Rebuilds `buffer` from scratch out of `sources`.
///
/// `mobile_skip_threshold` is a tuning knob: a mobile unit whose disk is already
/// at least that fraction visible is not stamped this update.
pub fn accumulate(
    buffer: &mut VisionBuffer,
    sources: &[VisionSource],
    mobile_skip_threshold: f32,
) -> AccumulateStats {
    buffer.clear();
    let mut stats = AccumulateStats::default();

    for source in sources {
        if let VisionSource::Fixed { center, radius } = *source {
            buffer.stamp_disk(center, radius);
            stats.fixed += 1;
        }
    }

    let grid = *buffer.grid();
    for source in sources {
        if let VisionSource::Border { tile, radius } = *source {
            if buffer.is_visible(grid.full_to_low_index(tile.x, tile.y)) {
                stats.border_skipped += 1;
                continue;
            }
            buffer.stamp_disk(tile, radius);
            stats.border += 1;
        }
    }

    for source in sources {
        if let VisionSource::Mobile { center, radius } = *source {
            if buffer.disk_coverage(center, radius) >= mobile_skip_threshold {
                stats.mobile_skipped += 1;
                continue;
            }
            buffer.stamp_disk(center, radius);
            stats.mobile += 1;
        }
    }

    stats
}
