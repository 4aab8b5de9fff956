use std::sync::Arc;

use bevy::math::UVec2;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use fog_core::{
    accumulate, BorderReply, DirtyChunks, FogConfig, FogEngine, FogGrid, FogState, GameView,
    PlayerId, TileRef, UnitKind, UnitView, VisionBuffer, VisionSource,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

struct BenchGame {
    size: UVec2,
    units: Vec<UnitView>,
}

impl BenchGame {
    fn new(size: u32, units: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let units = (0..units)
            .map(|i| {
                let tile = TileRef::from_xy(rng.gen_range(0..size), rng.gen_range(0..size), size);
                let kind = if i % 3 == 0 {
                    UnitKind::City
                } else {
                    UnitKind::Warship
                };
                UnitView::new(kind, tile)
            })
            .collect();
        Self {
            size: UVec2::splat(size),
            units,
        }
    }
}

impl GameView for BenchGame {
    fn map_size(&self) -> UVec2 {
        self.size
    }

    fn owner_at(&self, x: u32, y: u32) -> Option<PlayerId> {
        (x < self.size.x / 4 && y < self.size.y / 4).then_some(PlayerId(1))
    }

    fn player_ids(&self) -> Vec<PlayerId> {
        vec![PlayerId(1)]
    }

    fn is_alive(&self, _player: PlayerId) -> bool {
        true
    }

    fn is_allied(&self, _a: PlayerId, _b: PlayerId) -> bool {
        false
    }

    fn units(&self, _player: PlayerId) -> Vec<UnitView> {
        self.units.clone()
    }

    fn request_border_tiles(&self, _player: PlayerId, reply: BorderReply) {
        reply.fulfil(Ok(Vec::new()));
    }
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    let config = FogConfig::default();
    for size in [256u32, 512, 1024, 2048] {
        let scale = config.grid.scale_for_area(size as u64 * size as u64);
        let grid = FogGrid::new(UVec2::splat(size), scale);
        let mut vision = VisionBuffer::new(grid);
        vision.stamp_disk(UVec2::splat(size / 2), size / 4);

        group.bench_with_input(BenchmarkId::new("grid", size), &size, |b, _| {
            b.iter_batched(
                || {
                    (
                        FogState::new(grid.cell_count(), 204, 204),
                        DirtyChunks::new(grid.low_size(), 16),
                    )
                },
                |(mut state, mut chunks)| {
                    state.merge(&grid, &vision, |x, y| x < 64 && y < 64, &mut chunks)
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate");
    let grid = FogGrid::new(UVec2::splat(1024), 1);
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for count in [16usize, 64, 256] {
        let sources: Vec<VisionSource> = (0..count)
            .map(|i| {
                let center = UVec2::new(rng.gen_range(0..1024), rng.gen_range(0..1024));
                if i % 2 == 0 {
                    VisionSource::Fixed { center, radius: 30 }
                } else {
                    VisionSource::Mobile {
                        center,
                        radius: 140,
                    }
                }
            })
            .collect();
        let mut vision = VisionBuffer::new(grid);
        group.bench_with_input(BenchmarkId::new("sources", count), &count, |b, _| {
            b.iter(|| accumulate(&mut vision, &sources, 0.75))
        });
    }

    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let game = BenchGame::new(1024, 200);
    let mut engine = FogEngine::new(Arc::new(FogConfig::default()));
    if engine.attach(&game).is_err() {
        return;
    }
    engine.set_observed_player(Some(PlayerId(1)));

    c.bench_function("tick_with_refresh", |b| {
        b.iter(|| {
            engine.request_vision_refresh();
            engine.tick(&game)
        })
    });
}

criterion_group!(fog_benches, bench_merge, bench_accumulate, bench_tick);
criterion_main!(fog_benches);
