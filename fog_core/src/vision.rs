//! Vision source enumeration for the observed player and its allies.
//!
//! Sources are rebuilt from live game state on every vision update; nothing
//! here outlives the update except the border tile cache, which only holds the
//! latest reply per ally.

use std::collections::{BTreeMap, HashSet};

use bevy::math::UVec2;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{
    config::VisionConfig,
    game::{BorderMessage, BorderReply, GameView, PlayerId, TileRef},
};

/// A disk of vision for the current update, in full-resolution tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisionSource {
    /// Structure; always stamped.
    Fixed { center: UVec2, radius: u32 },
    /// Unit that moves; stamped only when it adds enough new coverage.
    Mobile { center: UVec2, radius: u32 },
    /// Tile on an ally's territory boundary.
    Border { tile: UVec2, radius: u32 },
}

/// The observed player plus every live player allied with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllianceSet {
    observed: Option<PlayerId>,
    members: Vec<PlayerId>,
}

impl AllianceSet {
    pub fn resolve<G: GameView + ?Sized>(game: &G, observed: PlayerId) -> Self {
        let mut members: Vec<PlayerId> = game
            .player_ids()
            .into_iter()
            .filter(|&player| {
                game.is_alive(player) && (player == observed || game.is_allied(observed, player))
            })
            .collect();
        members.sort_unstable();
        members.dedup();
        Self {
            observed: Some(observed),
            members,
        }
    }

    pub fn observed(&self) -> Option<PlayerId> {
        self.observed
    }

    /// Live members, sorted.
    pub fn members(&self) -> &[PlayerId] {
        &self.members
    }

    #[inline]
    pub fn contains(&self, player: PlayerId) -> bool {
        self.members.binary_search(&player).is_ok()
    }

    /// Land owned by the observed player (alive or not) or a live ally is always revealed.
    #[inline]
    pub fn reveals_owner(&self, owner: PlayerId) -> bool {
        self.observed == Some(owner) || self.contains(owner)
    }
}

/// Counters from draining border replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorderDrainStats {
    pub applied: usize,
    pub failed: usize,
    pub stale: usize,
}

/// Tracks asynchronous border tile fetches per ally.
///
/// At most one request per ally is in flight. Replies are tagged with the
/// session epoch they were issued under; replies from an older session are
/// discarded. Cached borders are yielded in ascending player order so the
/// border skip in accumulation is reproducible.
#[derive(Debug)]
pub struct BorderTracker {
    sender: Sender<BorderMessage>,
    receiver: Receiver<BorderMessage>,
    epoch: u64,
    cache: BTreeMap<PlayerId, Vec<TileRef>>,
    in_flight: HashSet<PlayerId>,
}

impl Default for BorderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BorderTracker {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            epoch: 0,
            cache: BTreeMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Starts a new session: forgets every cached border and in-flight request.
    pub fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.cache.clear();
        self.in_flight.clear();
    }

    pub fn in_flight(&self, player: PlayerId) -> bool {
        self.in_flight.contains(&player)
    }

    pub fn cached(&self, player: PlayerId) -> Option<&[TileRef]> {
        self.cache.get(&player).map(Vec::as_slice)
    }

    /// Drops state for players that left the alliance.
    pub fn retain_allies(&mut self, allies: &AllianceSet) {
        self.cache.retain(|player, _| allies.contains(*player));
        self.in_flight.retain(|player| allies.contains(*player));
    }

    /// Fires a fetch for every ally without one outstanding.
    pub fn request_missing<G: GameView + ?Sized>(&mut self, game: &G, allies: &AllianceSet) {
        for &ally in allies.members() {
            if self.in_flight.insert(ally) {
                let reply = BorderReply::new(self.epoch, ally, self.sender.clone());
                game.request_border_tiles(ally, reply);
            }
        }
    }

    /// Applies every reply that has arrived so far. Never blocks.
    pub fn drain(&mut self, allies: &AllianceSet) -> BorderDrainStats {
        let mut stats = BorderDrainStats::default();
        while let Ok(message) = self.receiver.try_recv() {
            if message.epoch != self.epoch {
                stats.stale += 1;
                continue;
            }
            self.in_flight.remove(&message.player);
            if !allies.contains(message.player) {
                stats.stale += 1;
                continue;
            }
            match message.result {
                Ok(tiles) => {
                    tracing::trace!(
                        target: "fog::vision",
                        player = message.player.0,
                        tiles = tiles.len(),
                        "fog.border_fetch_applied"
                    );
                    self.cache.insert(message.player, tiles);
                    stats.applied += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        target: "fog::vision",
                        player = message.player.0,
                        error = %err,
                        "fog.border_fetch_failed"
                    );
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    fn borders(&self) -> impl Iterator<Item = &TileRef> + '_ {
        self.cache.values().flatten()
    }
}

/// Collects this update's vision sources into `out`, replacing its contents.
pub fn enumerate_sources<G: GameView + ?Sized>(
    game: &G,
    allies: &AllianceSet,
    borders: &BorderTracker,
    vision: &VisionConfig,
    out: &mut Vec<VisionSource>,
) {
    out.clear();
    let size = game.map_size();
    let in_map = |tile: TileRef| tile.0 / size.x < size.y;
    let coords = |tile: TileRef| UVec2::new(tile.x(size.x), tile.y(size.x));

    for &ally in allies.members() {
        for unit in game.units(ally) {
            if !unit.grants_vision() || !in_map(unit.tile) {
                continue;
            }
            let center = coords(unit.tile);
            let radius = vision.radius_for(unit.kind, unit.level);
            out.push(if unit.kind.is_structure() {
                VisionSource::Fixed { center, radius }
            } else {
                VisionSource::Mobile { center, radius }
            });
        }
    }

    out.extend(
        borders
            .borders()
            .filter(|&&tile| in_map(tile))
            .map(|&tile| VisionSource::Border {
                tile: coords(tile),
                radius: vision.border_radius,
            }),
    );
}
