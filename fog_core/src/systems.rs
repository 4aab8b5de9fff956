//! Bevy hosting for the fog engine.
//!
//! Four systems run chained in `Update`:
//! 1. `attach_fog` - follow the game resource's lifecycle
//! 2. `sync_observed_player` - apply viewpoint switches (full reset)
//! 3. `tick_fog` - vision update on cadence, merge every step
//! 4. `rasterize_fog` - repaint dirty chunks into the overlay image

use std::marker::PhantomData;
use std::sync::Arc;

use bevy::prelude::*;

use crate::{
    config::{load_fog_config_from_env, FogConfig, FogConfigHandle},
    engine::FogEngine,
    game::{GameView, PlayerId},
    metrics::FogMetrics,
};

/// The player whose viewpoint the overlay shows. Writing to it, even with the
/// same value, resets all fog state.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedPlayer(pub Option<PlayerId>);

/// Installs the fog pipeline for a game exposed as resource `G`.
pub struct FogOfWarPlugin<G> {
    config: Option<Arc<FogConfig>>,
    _game: PhantomData<fn() -> G>,
}

impl<G> FogOfWarPlugin<G> {
    /// Uses an explicit config instead of `FOG_CONFIG_PATH` / the builtin.
    pub fn with_config(config: Arc<FogConfig>) -> Self {
        Self {
            config: Some(config),
            _game: PhantomData,
        }
    }
}

impl<G> Default for FogOfWarPlugin<G> {
    fn default() -> Self {
        Self {
            config: None,
            _game: PhantomData,
        }
    }
}

impl<G: GameView + Resource> Plugin for FogOfWarPlugin<G> {
    fn build(&self, app: &mut App) {
        let config = self.config.clone().unwrap_or_else(load_fog_config_from_env);
        app.insert_resource(FogConfigHandle::new(config.clone()))
            .insert_resource(FogEngine::new(config))
            .init_resource::<FogMetrics>()
            .init_resource::<ObservedPlayer>()
            .add_systems(
                Update,
                (
                    attach_fog::<G>,
                    sync_observed_player,
                    tick_fog::<G>,
                    rasterize_fog,
                )
                    .chain(),
            );
    }
}

/// Attaches when the game resource appears or is replaced with a different map;
/// detaches when it goes away. A failed attach is retried only after the game
/// resource changes.
pub fn attach_fog<G: GameView + Resource>(
    game: Option<Res<G>>,
    observed: Res<ObservedPlayer>,
    mut engine: ResMut<FogEngine>,
) {
    match game {
        Some(game) => {
            let map_changed = engine
                .grid()
                .map_or(true, |grid| grid.full_size() != game.map_size());
            let should_attach = game.is_added() || (game.is_changed() && map_changed);
            if !should_attach {
                return;
            }
            match engine.attach(&*game) {
                Ok(()) => engine.set_observed_player(observed.0),
                Err(err) => {
                    tracing::error!(
                        target: "fog::engine",
                        error = %err,
                        "fog.attach_failed"
                    );
                }
            }
        }
        None => {
            if engine.is_attached() {
                engine.detach();
            }
        }
    }
}

pub fn sync_observed_player(observed: Res<ObservedPlayer>, mut engine: ResMut<FogEngine>) {
    if observed.is_changed() && !observed.is_added() {
        engine.set_observed_player(observed.0);
    }
}

pub fn tick_fog<G: GameView + Resource>(
    game: Option<Res<G>>,
    mut engine: ResMut<FogEngine>,
    mut metrics: ResMut<FogMetrics>,
) {
    let Some(game) = game else {
        return;
    };
    let report = engine.tick(&*game);
    metrics.record_tick(&engine, &report);
}

pub fn rasterize_fog(mut engine: ResMut<FogEngine>, mut metrics: ResMut<FogMetrics>) {
    let repainted = engine.rasterize();
    if repainted > 0 {
        metrics.record_repaint(repainted, &engine);
        tracing::trace!(target: "fog::engine", chunks = repainted, "fog.rasterized");
    }
}
