use std::collections::HashMap;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use bevy::math::UVec2;
use bevy::prelude::Resource;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use fog_core::{
    build_fog_app, run_fog_step, BorderReply, FogEngine, FogMetrics, GameView, ObservedPlayer,
    PlayerId, TileRef, UnitKind, UnitView,
};

const WIDTH: u32 = 96;
const HEIGHT: u32 = 48;
const STEP_DELAY: Duration = Duration::from_millis(25);

/// Synthetic match: three players on square patches, 1 and 2 allied, with a
/// warship that patrols across the map.
#[derive(Resource)]
struct DemoGame {
    size: UVec2,
    owners: Vec<Option<PlayerId>>,
    players: Vec<PlayerId>,
    units: HashMap<PlayerId, Vec<UnitView>>,
    patrol_step: u32,
}

impl DemoGame {
    fn generate(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let size = UVec2::new(WIDTH, HEIGHT);
        let mut game = Self {
            size,
            owners: vec![None; (WIDTH * HEIGHT) as usize],
            players: Vec::new(),
            units: HashMap::new(),
            patrol_step: 0,
        };

        for id in 1..=3 {
            let player = PlayerId(id);
            let half = rng.gen_range(4..8u32);
            let cx = rng.gen_range(half..WIDTH - half);
            let cy = rng.gen_range(half..HEIGHT - half);
            for y in cy - half..=cy + half {
                for x in cx - half..=cx + half {
                    game.owners[(y * WIDTH + x) as usize] = Some(player);
                }
            }
            game.players.push(player);
            game.units.entry(player).or_default().push(UnitView::new(
                UnitKind::City,
                TileRef::from_xy(cx, cy, WIDTH),
            ));
        }
        game.units
            .entry(PlayerId(1))
            .or_default()
            .push(UnitView::new(UnitKind::Warship, TileRef::from_xy(0, HEIGHT / 2, WIDTH)));
        game
    }

    /// Moves the warship one tile along its patrol line.
    fn advance(&mut self) {
        self.patrol_step = (self.patrol_step + 1) % WIDTH;
        let tile = TileRef::from_xy(self.patrol_step, HEIGHT / 2, WIDTH);
        if let Some(units) = self.units.get_mut(&PlayerId(1)) {
            for unit in units.iter_mut().filter(|unit| unit.kind == UnitKind::Warship) {
                unit.tile = tile;
            }
        }
    }

    fn border_tiles(&self, player: PlayerId) -> Vec<TileRef> {
        let mut tiles = Vec::new();
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                if self.owner_at(x, y) != Some(player) {
                    continue;
                }
                let edge = x == 0
                    || y == 0
                    || x + 1 == WIDTH
                    || y + 1 == HEIGHT
                    || self.owner_at(x - 1, y) != Some(player)
                    || self.owner_at(x + 1, y) != Some(player)
                    || self.owner_at(x, y - 1) != Some(player)
                    || self.owner_at(x, y + 1) != Some(player);
                if edge {
                    tiles.push(TileRef::from_xy(x, y, WIDTH));
                }
            }
        }
        tiles
    }
}

impl GameView for DemoGame {
    fn map_size(&self) -> UVec2 {
        self.size
    }

    fn owner_at(&self, x: u32, y: u32) -> Option<PlayerId> {
        self.owners.get((y * WIDTH + x) as usize).copied().flatten()
    }

    fn player_ids(&self) -> Vec<PlayerId> {
        self.players.clone()
    }

    fn is_alive(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }

    fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool {
        matches!((a.0.min(b.0), a.0.max(b.0)), (1, 2))
    }

    fn units(&self, player: PlayerId) -> Vec<UnitView> {
        self.units.get(&player).cloned().unwrap_or_default()
    }

    fn request_border_tiles(&self, player: PlayerId, reply: BorderReply) {
        // Answer from a worker thread; the engine picks it up on a later update.
        let tiles = self.border_tiles(player);
        thread::spawn(move || reply.fulfil(Ok(tiles)));
    }
}

#[derive(Debug)]
enum Command {
    Step(u32),
    Observe(Option<PlayerId>),
    Claim { x: u32, y: u32 },
    Dump,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "step" => Command::Step(parts.next().map_or(Some(1), |n| n.parse().ok())?),
        "observe" => match parts.next()? {
            "none" => Command::Observe(None),
            id => Command::Observe(Some(PlayerId(id.parse().ok()?))),
        },
        "claim" => Command::Claim {
            x: parts.next()?.parse().ok()?,
            y: parts.next()?.parse().ok()?,
        },
        "dump" => Command::Dump,
        "quit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

fn dump(app: &bevy::app::App) {
    let engine = app.world.resource::<FogEngine>();
    if let (Some(state), Some(grid)) = (engine.fog_state(), engine.grid()) {
        println!("{}", state.ascii_dump(grid));
    }
    println!("{:#?}", app.world.resource::<FogMetrics>());
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let seed = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(7);
    let mut app = build_fog_app(DemoGame::generate(seed));
    app.insert_resource(ObservedPlayer(Some(PlayerId(1))));
    run_fog_step(&mut app);

    info!(
        target: "fog::demo",
        seed,
        width = WIDTH,
        height = HEIGHT,
        "fog_demo ready (commands: step [n], observe <id|none>, claim <x> <y>, dump, quit)"
    );

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(target: "fog::demo", error = %err, "fog_demo.stdin_failed");
                break;
            }
        };
        let Some(command) = parse_command(&line) else {
            warn!(target: "fog::demo", line = %line, "fog_demo.unknown_command");
            continue;
        };
        match command {
            Command::Step(steps) => {
                for _ in 0..steps {
                    app.world.resource_mut::<DemoGame>().advance();
                    run_fog_step(&mut app);
                    thread::sleep(STEP_DELAY);
                }
            }
            Command::Observe(player) => {
                app.world.resource_mut::<ObservedPlayer>().0 = player;
                run_fog_step(&mut app);
            }
            Command::Claim { x, y } => {
                let claimed = app.world.resource_mut::<FogEngine>().claim_territory(x, y);
                info!(target: "fog::demo", x, y, claimed, "fog_demo.claim");
            }
            Command::Dump => dump(&app),
            Command::Quit => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert!(matches!(parse_command("step"), Some(Command::Step(1))));
        assert!(matches!(parse_command("step 5"), Some(Command::Step(5))));
        assert!(matches!(parse_command("step x"), None));
        assert!(matches!(
            parse_command("observe 2"),
            Some(Command::Observe(Some(PlayerId(2))))
        ));
        assert!(matches!(parse_command("observe none"), Some(Command::Observe(None))));
        assert!(matches!(parse_command("claim 3 4"), Some(Command::Claim { x: 3, y: 4 })));
        assert!(parse_command("launch").is_none());
    }

    #[test]
    fn border_tiles_belong_to_their_player() {
        let game = DemoGame::generate(7);
        for &player in &game.players {
            let borders = game.border_tiles(player);
            assert!(borders
                .iter()
                .all(|tile| game.owner_at(tile.x(WIDTH), tile.y(WIDTH)) == Some(player)));
        }
    }
}
