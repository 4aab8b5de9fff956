//! The fog engine facade driven by the host once per simulation step.

use std::collections::TryReserveError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bevy::prelude::Resource;

use crate::{
    accumulator::{accumulate, AccumulateStats, VisionBuffer},
    chunks::DirtyChunks,
    config::FogConfig,
    fog_state::{FogState, MergeStats, FOG_UNSEEN},
    game::{GameView, PlayerId, TileRef},
    grid::FogGrid,
    overlay::{FogImage, FogSurface, OverlayPlacement, OverlayRasterizer},
    vision::{enumerate_sources, AllianceSet, BorderDrainStats, BorderTracker, VisionSource},
};

/// Errors surfaced when the engine attaches to a game. Nothing after attach fails loudly.
#[derive(Debug, thiserror::Error)]
pub enum FogError {
    #[error("map has no tiles ({width}x{height})")]
    EmptyMap { width: u32, height: u32 },
    #[error("map of {width}x{height} tiles exceeds the addressable tile range")]
    MapTooLarge { width: u32, height: u32 },
    #[error("failed to allocate fog buffers: {0}")]
    Allocation(#[from] TryReserveError),
}

/// What one call to [`FogEngine::tick_at`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub vision_updated: bool,
    pub sources: usize,
    pub accumulate: AccumulateStats,
    pub borders: BorderDrainStats,
    pub merge: MergeStats,
}

/// Arrays owned for the lifetime of one attachment.
#[derive(Debug)]
struct FogSession {
    grid: FogGrid,
    state: FogState,
    vision: VisionBuffer,
    chunks: DirtyChunks,
    image: FogImage,
}

impl FogSession {
    fn allocate(grid: FogGrid, config: &FogConfig) -> Result<Self, FogError> {
        let cells = grid.cell_count();
        let fog = try_filled(cells, FOG_UNSEEN)?;
        let vision = try_filled(cells, false)?;
        let image = FogImage::try_new(grid.low_size())?;
        let mut chunks = DirtyChunks::new(grid.low_size(), config.grid.chunk_size);
        chunks.mark_all_dirty();
        Ok(Self {
            grid,
            state: FogState::try_from_buffer(
                fog,
                config.fade.remembered_floor,
                config.fade.fade_step,
            )?,
            vision: VisionBuffer::with_cells(grid, vision),
            chunks,
            image,
        })
    }

    fn reset(&mut self) {
        self.state.reset();
        self.vision.clear();
        self.chunks.mark_all_dirty();
    }
}

fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, TryReserveError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len)?;
    buffer.resize(len, value);
    Ok(buffer)
}

/// Fog-of-war visibility engine for a single observed player.
///
/// Lifecycle: [`FogEngine::attach`] allocates the grid for a map,
/// [`FogEngine::set_observed_player`] picks the viewpoint (and resets all
/// state), [`FogEngine::tick`] runs once per simulation step and
/// [`FogEngine::render_into`] once per frame.
#[derive(Resource, Debug)]
pub struct FogEngine {
    config: Arc<FogConfig>,
    rasterizer: OverlayRasterizer,
    session: Option<FogSession>,
    observed: Option<PlayerId>,
    allies: AllianceSet,
    borders: BorderTracker,
    sources: Vec<VisionSource>,
    last_vision_update: Option<Instant>,
    refresh_requested: bool,
}

impl FogEngine {
    /// A detached engine. Call [`FogEngine::attach`] before ticking.
    pub fn new(config: Arc<FogConfig>) -> Self {
        let rasterizer = OverlayRasterizer::new(&config.overlay);
        Self {
            config,
            rasterizer,
            session: None,
            observed: None,
            allies: AllianceSet::default(),
            borders: BorderTracker::new(),
            sources: Vec::new(),
            last_vision_update: None,
            refresh_requested: false,
        }
    }

    pub fn config(&self) -> &FogConfig {
        &self.config
    }

    /// Allocates fog, territory, vision and image buffers sized for `game`'s map.
    /// Re-attaching replaces any previous allocation and resets all state.
    pub fn attach<G: GameView + ?Sized>(&mut self, game: &G) -> Result<(), FogError> {
        let size = game.map_size();
        if size.x == 0 || size.y == 0 {
            return Err(FogError::EmptyMap {
                width: size.x,
                height: size.y,
            });
        }
        let area = size.x as u64 * size.y as u64;
        if area > u32::MAX as u64 {
            return Err(FogError::MapTooLarge {
                width: size.x,
                height: size.y,
            });
        }

        let grid = FogGrid::new(size, self.config.grid.scale_for_area(area));
        self.session = Some(FogSession::allocate(grid, &self.config)?);
        self.reset_viewpoint();

        tracing::info!(
            target: "fog::engine",
            width = size.x,
            height = size.y,
            scale = grid.scale(),
            low_width = grid.low_size().x,
            low_height = grid.low_size().y,
            chunks = self.session.as_ref().map_or(0, |session| session.chunks.len()),
            "fog.attached"
        );
        Ok(())
    }

    /// Releases every buffer. Ticks and renders become no-ops until re-attached.
    pub fn detach(&mut self) {
        self.session = None;
        self.observed = None;
        self.reset_viewpoint();
        tracing::info!(target: "fog::engine", "fog.detached");
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    pub fn grid(&self) -> Option<&FogGrid> {
        self.session.as_ref().map(|session| &session.grid)
    }

    pub fn fog_state(&self) -> Option<&FogState> {
        self.session.as_ref().map(|session| &session.state)
    }

    pub fn vision(&self) -> Option<&VisionBuffer> {
        self.session.as_ref().map(|session| &session.vision)
    }

    pub fn chunks(&self) -> Option<&DirtyChunks> {
        self.session.as_ref().map(|session| &session.chunks)
    }

    pub fn image(&self) -> Option<&FogImage> {
        self.session.as_ref().map(|session| &session.image)
    }

    pub fn observed_player(&self) -> Option<PlayerId> {
        self.observed
    }

    /// Alliance set as of the last tick.
    pub fn allies(&self) -> &AllianceSet {
        &self.allies
    }

    /// Switches the viewpoint. Always resets fog, territory and vision to
    /// "never seen", even when `player` is already observed.
    pub fn set_observed_player(&mut self, player: Option<PlayerId>) {
        self.observed = player;
        self.reset_viewpoint();
        tracing::info!(
            target: "fog::engine",
            player = player.map(|player| player.0),
            epoch = self.borders.epoch(),
            "fog.observed_player_set"
        );
    }

    pub fn clear_observed_player(&mut self) {
        self.set_observed_player(None);
    }

    fn reset_viewpoint(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.reset();
        }
        self.allies = AllianceSet::default();
        self.borders.reset();
        self.sources.clear();
        self.last_vision_update = None;
        self.refresh_requested = false;
    }

    /// Forces the next tick to rebuild vision regardless of the interval.
    pub fn request_vision_refresh(&mut self) {
        self.refresh_requested = true;
    }

    /// Forces a full repaint on the next render.
    pub fn mark_all_dirty(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.chunks.mark_all_dirty();
        }
    }

    pub fn has_dirty_chunks(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.chunks.has_dirty_chunks())
    }

    /// Permanently reveals the low-resolution cell containing full-resolution `(x, y)`.
    /// Out-of-range coordinates are clamped onto the map edge.
    pub fn claim_territory(&mut self, x: u32, y: u32) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let index = session.grid.full_to_low_index(x, y);
        session.state.claim_territory(index, &mut session.chunks)
    }

    /// Normalised fog in `[0, 1]` for a full-resolution tile. Without a viewpoint
    /// nothing is hidden and this reports `0`.
    pub fn fog_value_at(&self, tile: TileRef) -> f32 {
        match (&self.session, self.observed) {
            (Some(session), Some(_)) => {
                let index = session.grid.full_index_to_low_index(tile);
                session.state.fog_at(index) as f32 / FOG_UNSEEN as f32
            }
            _ => 0.0,
        }
    }

    pub fn tick<G: GameView + ?Sized>(&mut self, game: &G) -> TickReport {
        self.tick_at(game, Instant::now())
    }

    /// Advances fog by one simulation step. Vision sources are rebuilt when the
    /// update interval has elapsed since the last rebuild (or on the first tick
    /// of a viewpoint); the merge runs every time.
    pub fn tick_at<G: GameView + ?Sized>(&mut self, game: &G, now: Instant) -> TickReport {
        let Self {
            config,
            session,
            observed,
            allies,
            borders,
            sources,
            last_vision_update,
            refresh_requested,
            ..
        } = self;
        let (Some(session), Some(observed)) = (session.as_mut(), *observed) else {
            return TickReport::default();
        };
        if game.map_size() != session.grid.full_size() {
            tracing::warn!(
                target: "fog::engine",
                expected = ?session.grid.full_size(),
                actual = ?game.map_size(),
                "fog.map_size_mismatch"
            );
            return TickReport::default();
        }

        let mut report = TickReport::default();
        *allies = AllianceSet::resolve(game, observed);

        let interval = Duration::from_millis(config.vision.update_interval_ms);
        let due = *refresh_requested
            || last_vision_update.map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            borders.retain_allies(allies);
            borders.request_missing(game, allies);
            report.borders = borders.drain(allies);
            enumerate_sources(game, allies, borders, &config.vision, sources);
            report.accumulate = accumulate(
                &mut session.vision,
                sources,
                config.vision.mobile_skip_threshold,
            );
            report.sources = sources.len();
            report.vision_updated = true;
            *last_vision_update = Some(now);
            *refresh_requested = false;

            tracing::debug!(
                target: "fog::vision",
                player = observed.0,
                allies = allies.members().len(),
                sources = sources.len(),
                fixed = report.accumulate.fixed,
                border = report.accumulate.border,
                border_skipped = report.accumulate.border_skipped,
                mobile = report.accumulate.mobile,
                mobile_skipped = report.accumulate.mobile_skipped,
                "fog.vision_update"
            );
        }

        let alliance = &*allies;
        report.merge = session.state.merge(
            &session.grid,
            &session.vision,
            |x, y| {
                game.owner_at(x, y)
                    .is_some_and(|owner| alliance.reveals_owner(owner))
            },
            &mut session.chunks,
        );

        tracing::trace!(
            target: "fog::engine",
            changed = report.merge.changed,
            visible = report.merge.visible,
            remembered = report.merge.remembered,
            unseen = report.merge.unseen,
            "fog.merge"
        );
        report
    }

    /// Repaints dirty chunks into the overlay image. Returns the number repainted.
    pub fn rasterize(&mut self) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        if self.observed.is_none() || !session.chunks.has_dirty_chunks() {
            return 0;
        }
        self.rasterizer.rasterize(
            &session.grid,
            &session.state,
            &mut session.chunks,
            &mut session.image,
        )
    }

    /// Rasterizes dirty chunks, then hands the overlay to `surface`.
    /// Returns `false` (and draws nothing) when detached or without a viewpoint.
    pub fn render_into<S: FogSurface + ?Sized>(&mut self, surface: &mut S) -> bool {
        if self.observed.is_none() {
            return false;
        }
        self.rasterize();
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        surface.composite(&session.image, OverlayPlacement::centered(&session.grid));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{UnitKind, UnitView};
    use crate::testing::StubGame;
    use bevy::math::UVec2;

    const P1: PlayerId = PlayerId(1);

    fn engine_for(game: &StubGame) -> FogEngine {
        let mut engine = FogEngine::new(Arc::new(FogConfig::default()));
        engine.attach(game).expect("attach");
        engine.set_observed_player(Some(P1));
        engine
    }

    fn city_game() -> StubGame {
        let mut game = StubGame::new(100, 100);
        game.add_player(P1);
        game.add_unit(
            P1,
            UnitView::new(UnitKind::City, TileRef::from_xy(10, 10, 100)),
        );
        game
    }

    #[derive(Default)]
    struct RecordingSurface {
        composites: Vec<(UVec2, OverlayPlacement)>,
    }

    impl FogSurface for RecordingSurface {
        fn composite(&mut self, image: &FogImage, placement: OverlayPlacement) {
            self.composites.push((image.size(), placement));
        }
    }

    #[test]
    fn empty_map_is_rejected() {
        let game = StubGame::new(0, 10);
        let mut engine = FogEngine::new(Arc::new(FogConfig::default()));
        let err = engine.attach(&game).expect_err("empty map");
        assert!(matches!(err, FogError::EmptyMap { width: 0, height: 10 }));
        assert!(!engine.is_attached());
    }

    #[test]
    fn vision_rebuilds_on_interval_only() {
        let game = city_game();
        let mut engine = engine_for(&game);
        let start = Instant::now();

        assert!(engine.tick_at(&game, start).vision_updated);
        assert!(!engine.tick_at(&game, start + Duration::from_millis(50)).vision_updated);
        assert!(engine.tick_at(&game, start + Duration::from_millis(100)).vision_updated);

        engine.request_vision_refresh();
        assert!(engine.tick_at(&game, start + Duration::from_millis(110)).vision_updated);
    }

    #[test]
    fn merge_runs_every_tick_between_vision_updates() {
        let mut game = city_game();
        let mut engine = engine_for(&game);
        let start = Instant::now();
        engine.tick_at(&game, start);

        // Ownership changes are picked up on the very next tick.
        game.set_owner(90, 90, Some(P1));
        let report = engine.tick_at(&game, start + Duration::from_millis(10));
        assert!(!report.vision_updated);
        assert_eq!(report.merge.changed, 1);
        assert_eq!(engine.fog_value_at(TileRef::from_xy(90, 90, 100)), 0.0);
    }

    #[test]
    fn lost_vision_settles_on_floor_after_next_update() {
        let mut game = city_game();
        let mut engine = engine_for(&game);
        let start = Instant::now();
        engine.tick_at(&game, start);

        game.clear_units(P1);
        // Vision is only rebuilt on the interval, so the city still counts until then.
        engine.tick_at(&game, start + Duration::from_millis(50));
        assert_eq!(engine.fog_value_at(TileRef::from_xy(10, 10, 100)), 0.0);

        engine.tick_at(&game, start + Duration::from_millis(100));
        let floor = engine.config().fade.remembered_floor;
        let state = engine.fog_state().expect("attached");
        assert_eq!(state.fog_at(10 * 100 + 10), floor);
        assert_eq!(state.fog_at(45 * 100 + 10), FOG_UNSEEN);
    }

    #[test]
    fn overlapping_ally_borders_give_the_same_vision_every_run() {
        let mut game = StubGame::new(40, 20);
        game.add_player(P1);
        game.add_player(PlayerId(2));
        game.ally(P1, PlayerId(2));
        game.set_borders(P1, vec![TileRef::from_xy(10, 10, 40)]);
        game.set_borders(PlayerId(2), vec![TileRef::from_xy(18, 10, 40)]);

        for _ in 0..64 {
            let mut engine = engine_for(&game);
            let report = engine.tick_at(&game, Instant::now());
            assert_eq!(report.accumulate.border, 1);
            assert_eq!(report.accumulate.border_skipped, 1);
            let vision = engine.vision().expect("attached");
            // The lower player id's tile is stamped; the other falls inside it.
            assert!(vision.is_visible(10 * 40));
            assert!(!vision.is_visible(10 * 40 + 28));
        }
    }

    #[test]
    fn claim_territory_clamps_and_pins() {
        let game = city_game();
        let mut engine = engine_for(&game);
        assert!(engine.claim_territory(5_000, 5_000));
        let state = engine.fog_state().expect("attached");
        assert!(state.is_territory(99 * 100 + 99));
        assert!(!engine.claim_territory(99, 99));
    }

    #[test]
    fn fog_value_is_normalised() {
        let game = city_game();
        let mut engine = engine_for(&game);
        engine.tick_at(&game, Instant::now());
        assert_eq!(engine.fog_value_at(TileRef::from_xy(10, 10, 100)), 0.0);
        assert_eq!(engine.fog_value_at(TileRef::from_xy(90, 90, 100)), 1.0);

        engine.clear_observed_player();
        assert_eq!(engine.fog_value_at(TileRef::from_xy(90, 90, 100)), 0.0);
    }

    #[test]
    fn render_paints_once_then_only_on_change() {
        let game = city_game();
        let mut engine = engine_for(&game);
        let mut surface = RecordingSurface::default();
        let start = Instant::now();

        engine.tick_at(&game, start);
        assert!(engine.render_into(&mut surface));
        assert!(!engine.has_dirty_chunks());
        assert_eq!(surface.composites.len(), 1);
        let (size, placement) = surface.composites[0];
        assert_eq!(size, UVec2::new(100, 100));
        assert_eq!(placement.scale, 1.0);

        engine.tick_at(&game, start + Duration::from_millis(10));
        assert!(!engine.has_dirty_chunks());
        assert_eq!(engine.rasterize(), 0);
    }

    #[test]
    fn nothing_renders_without_viewpoint() {
        let game = city_game();
        let mut engine = engine_for(&game);
        engine.clear_observed_player();
        let report = engine.tick_at(&game, Instant::now());
        assert_eq!(report, TickReport::default());
        let mut surface = RecordingSurface::default();
        assert!(!engine.render_into(&mut surface));
        assert!(surface.composites.is_empty());
    }

    #[test]
    fn detached_engine_ignores_everything() {
        let game = city_game();
        let mut engine = engine_for(&game);
        engine.detach();
        assert!(!engine.is_attached());
        assert_eq!(engine.tick_at(&game, Instant::now()), TickReport::default());
        assert!(!engine.claim_territory(1, 1));
        assert_eq!(engine.rasterize(), 0);
    }

    #[test]
    fn map_size_mismatch_skips_tick() {
        let game = city_game();
        let mut engine = engine_for(&game);
        let other = StubGame::new(50, 50);
        assert_eq!(engine.tick_at(&other, Instant::now()), TickReport::default());
    }
}
