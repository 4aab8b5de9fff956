use std::path::PathBuf;
use std::sync::{Arc, Once};

use bevy::prelude::*;
use fog_core::{FogConfig, FogOfWarPlugin};

pub use fog_core::testing::StubGame;

static INIT: Once = Once::new();

/// Routes fog diagnostics to the test harness; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fixture config: vision rebuilds on every step and chunks are 8x8.
pub fn test_config() -> Arc<FogConfig> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_fog_config.json");
    Arc::new(FogConfig::from_file(&path).expect("test fog config should load"))
}

pub fn build_test_app(game: StubGame) -> App {
    init_tracing();
    let mut app = App::new();
    app.insert_resource(game)
        .add_plugins(MinimalPlugins)
        .add_plugins(FogOfWarPlugin::<StubGame>::with_config(test_config()));
    app
}
