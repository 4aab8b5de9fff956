use bevy::prelude::*;

use crate::engine::{FogEngine, TickReport};

/// Running counters for the fog overlay, refreshed after every tick.
#[derive(Resource, Default, Debug, Clone, PartialEq)]
pub struct FogMetrics {
    pub ticks: u64,
    pub vision_updates: u64,
    pub grid_size: (u32, u32),
    pub scale: u32,
    pub visible_cells: usize,
    pub remembered_cells: usize,
    pub unseen_cells: usize,
    pub territory_cells: usize,
    pub dirty_chunks: usize,
    pub chunks_repainted: u64,
    pub fixed_sources: usize,
    pub border_sources: usize,
    pub border_sources_skipped: usize,
    pub mobile_sources: usize,
    pub mobile_sources_skipped: usize,
    pub border_replies_applied: u64,
    pub border_replies_failed: u64,
    pub border_replies_stale: u64,
}

impl FogMetrics {
    /// Folds one tick's report into the counters. Per-update source counts are
    /// only replaced when vision was actually rebuilt.
    pub fn record_tick(&mut self, engine: &FogEngine, report: &TickReport) {
        self.ticks += 1;
        if let Some(grid) = engine.grid() {
            self.grid_size = (grid.low_size().x, grid.low_size().y);
            self.scale = grid.scale();
        } else {
            self.grid_size = (0, 0);
            self.scale = 0;
        }

        self.visible_cells = report.merge.visible;
        self.remembered_cells = report.merge.remembered;
        self.unseen_cells = report.merge.unseen;
        self.territory_cells = engine
            .fog_state()
            .map_or(0, |state| state.territory_count());
        self.dirty_chunks = engine.chunks().map_or(0, |chunks| chunks.dirty_count());

        if report.vision_updated {
            self.vision_updates += 1;
            self.fixed_sources = report.accumulate.fixed;
            self.border_sources = report.accumulate.border;
            self.border_sources_skipped = report.accumulate.border_skipped;
            self.mobile_sources = report.accumulate.mobile;
            self.mobile_sources_skipped = report.accumulate.mobile_skipped;
        }

        self.border_replies_applied += report.borders.applied as u64;
        self.border_replies_failed += report.borders.failed as u64;
        self.border_replies_stale += report.borders.stale as u64;
    }

    pub fn record_repaint(&mut self, chunks: usize, engine: &FogEngine) {
        self.chunks_repainted += chunks as u64;
        self.dirty_chunks = engine.chunks().map_or(0, |chunks| chunks.dirty_count());
    }
}
