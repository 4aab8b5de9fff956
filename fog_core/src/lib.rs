//! Fog-of-war visibility engine for a tile-based strategy game.
//!
//! Each simulation step the engine folds the observed player's (and live
//! allies') vision into a persistent, downsampled fog grid; each frame it
//! repaints only the chunks that changed into an RGBA overlay.

pub mod accumulator;
pub mod chunks;
pub mod config;
pub mod engine;
pub mod fog_state;
pub mod game;
pub mod grid;
pub mod metrics;
pub mod overlay;
pub mod systems;
pub mod vision;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use bevy::prelude::*;

pub use accumulator::{accumulate, AccumulateStats, VisionBuffer};
pub use chunks::{DirtyChunks, FogChunk};
pub use config::{
    load_fog_config_from_env, FadeConfig, FogConfig, FogConfigError, FogConfigHandle, GridConfig,
    OverlayConfig, VisionConfig,
};
pub use engine::{FogEngine, FogError, TickReport};
pub use fog_state::{FogState, MergeStats, FOG_UNSEEN, FOG_VISIBLE};
pub use game::{
    BorderFetchError, BorderReply, GameView, PlayerId, TileRef, UnitFlags, UnitKind, UnitView,
};
pub use grid::FogGrid;
pub use metrics::FogMetrics;
pub use overlay::{FogImage, FogSurface, OverlayPlacement, OverlayRasterizer};
pub use systems::{FogOfWarPlugin, ObservedPlayer};
pub use vision::{AllianceSet, BorderDrainStats, BorderTracker, VisionSource};

/// Construct a headless Bevy [`App`] hosting the fog pipeline for `game`.
pub fn build_fog_app<G: GameView + Resource>(game: G) -> App {
    let mut app = App::new();
    app.insert_resource(game)
        .add_plugins(MinimalPlugins)
        .add_plugins(FogOfWarPlugin::<G>::default());
    app
}

/// Execute a single fog step.
///
/// Runs the chained systems installed by [`FogOfWarPlugin`]
/// (attach → observed player sync → tick → rasterize).
pub fn run_fog_step(app: &mut App) {
    app.update();
}
