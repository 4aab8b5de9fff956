//! In-memory [`GameView`] shared by the unit tests and, behind the
//! `test-support` feature, by downstream integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use bevy::math::UVec2;
use bevy::prelude::Resource;

use crate::game::{BorderFetchError, BorderReply, GameView, PlayerId, TileRef, UnitView};

/// Game with explicit ownership, alliances, units and border replies.
#[derive(Resource, Default)]
pub struct StubGame {
    size: UVec2,
    owners: Vec<Option<PlayerId>>,
    players: Vec<PlayerId>,
    dead: HashSet<PlayerId>,
    alliances: HashSet<(PlayerId, PlayerId)>,
    units: HashMap<PlayerId, Vec<UnitView>>,
    borders: HashMap<PlayerId, Result<Vec<TileRef>, BorderFetchError>>,
    defer: bool,
    deferred: Mutex<Vec<BorderReply>>,
}

impl StubGame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: UVec2::new(width, height),
            owners: vec![None; width as usize * height as usize],
            ..Default::default()
        }
    }

    pub fn with_players(mut self, players: &[PlayerId]) -> Self {
        self.players.extend_from_slice(players);
        self
    }

    pub fn width(&self) -> u32 {
        self.size.x
    }

    pub fn add_player(&mut self, player: PlayerId) {
        self.players.push(player);
    }

    pub fn kill(&mut self, player: PlayerId) {
        self.dead.insert(player);
    }

    pub fn ally(&mut self, a: PlayerId, b: PlayerId) {
        self.alliances.insert((a.min(b), a.max(b)));
    }

    pub fn break_alliance(&mut self, a: PlayerId, b: PlayerId) {
        self.alliances.remove(&(a.min(b), a.max(b)));
    }

    pub fn add_unit(&mut self, player: PlayerId, unit: UnitView) {
        self.units.entry(player).or_default().push(unit);
    }

    pub fn clear_units(&mut self, player: PlayerId) {
        self.units.remove(&player);
    }

    pub fn set_owner(&mut self, x: u32, y: u32, owner: Option<PlayerId>) {
        let index = self.index(x, y);
        self.owners[index] = owner;
    }

    pub fn set_borders(&mut self, player: PlayerId, tiles: Vec<TileRef>) {
        self.borders.insert(player, Ok(tiles));
    }

    pub fn fail_borders(&mut self, player: PlayerId, error: BorderFetchError) {
        self.borders.insert(player, Err(error));
    }

    /// Hold border replies until [`StubGame::release_borders`].
    pub fn defer_borders(&mut self, defer: bool) {
        self.defer = defer;
    }

    /// Completes every deferred border request.
    pub fn release_borders(&self) {
        let pending = std::mem::take(
            &mut *self
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for reply in pending {
            let result = self.border_result(reply.player());
            reply.fulfil(result);
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.size.x as usize + x as usize
    }

    fn border_result(&self, player: PlayerId) -> Result<Vec<TileRef>, BorderFetchError> {
        self.borders
            .get(&player)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

impl GameView for StubGame {
    fn map_size(&self) -> UVec2 {
        self.size
    }

    fn owner_at(&self, x: u32, y: u32) -> Option<PlayerId> {
        self.owners.get(self.index(x, y)).copied().flatten()
    }

    fn player_ids(&self) -> Vec<PlayerId> {
        self.players.clone()
    }

    fn is_alive(&self, player: PlayerId) -> bool {
        self.players.contains(&player) && !self.dead.contains(&player)
    }

    fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool {
        self.alliances.contains(&(a.min(b), a.max(b)))
    }

    fn units(&self, player: PlayerId) -> Vec<UnitView> {
        self.units.get(&player).cloned().unwrap_or_default()
    }

    fn request_border_tiles(&self, player: PlayerId, reply: BorderReply) {
        if self.defer {
            self.deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(reply);
        } else {
            reply.fulfil(self.border_result(player));
        }
    }
}

