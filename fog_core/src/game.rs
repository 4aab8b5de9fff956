//! Read-only view of the game simulation consumed by the fog engine.
//!
//! The engine never mutates game state. Everything it needs (map size, tile
//! ownership, players, alliances, units and border tiles) is pulled through
//! [`GameView`] once per tick or once per vision update.

use std::fmt;

use bevy::math::UVec2;
use bitflags::bitflags;
use crossbeam_channel::Sender;

/// Identifier for a player participating in the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full-resolution tile reference, row-major (`y * width + x`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileRef(pub u32);

impl TileRef {
    #[inline]
    pub fn from_xy(x: u32, y: u32, width: u32) -> Self {
        Self(y * width + x)
    }

    #[inline]
    pub fn x(self, width: u32) -> u32 {
        self.0 % width
    }

    #[inline]
    pub fn y(self, width: u32) -> u32 {
        self.0 / width
    }
}

/// Unit categories that carry distinct vision ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    City,
    Port,
    DefensePost,
    Warship,
    MissileSilo,
    SamLauncher,
    Factory,
    TransportShip,
    TradeShip,
    Other,
}

impl UnitKind {
    /// Fixed structures always project vision; everything else is mobile.
    pub fn is_structure(self) -> bool {
        matches!(
            self,
            Self::City
                | Self::Port
                | Self::DefensePost
                | Self::MissileSilo
                | Self::SamLauncher
                | Self::Factory
        )
    }

    /// Upgradable kinds scale their vision radius with level.
    pub fn is_upgradable(self) -> bool {
        matches!(
            self,
            Self::City | Self::Port | Self::MissileSilo | Self::SamLauncher | Self::Factory
        )
    }

    /// Key used for the vision range table in the fog config.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::City => "city",
            Self::Port => "port",
            Self::DefensePost => "defense_post",
            Self::Warship => "warship",
            Self::MissileSilo => "missile_silo",
            Self::SamLauncher => "sam_launcher",
            Self::Factory => "factory",
            Self::TransportShip => "transport_ship",
            Self::TradeShip => "trade_ship",
            Self::Other => "other",
        }
    }
}

bitflags! {
    /// Lifecycle flags reported for a unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UnitFlags: u8 {
        const ACTIVE = 1 << 0;
        const UNDER_CONSTRUCTION = 1 << 1;
    }
}

/// Read-only snapshot of a unit as seen by the fog engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitView {
    pub kind: UnitKind,
    pub level: u32,
    pub tile: TileRef,
    pub flags: UnitFlags,
}

impl UnitView {
    /// An active unit at level 1.
    pub fn new(kind: UnitKind, tile: TileRef) -> Self {
        Self {
            kind,
            level: 1,
            tile,
            flags: UnitFlags::ACTIVE,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_flags(mut self, flags: UnitFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Inactive units (destroyed, in transit between owners) project nothing.
    /// Structures still under construction do.
    pub fn grants_vision(&self) -> bool {
        self.flags.contains(UnitFlags::ACTIVE)
    }
}

/// Error reported for a single ally's border tile fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BorderFetchError {
    #[error("border tiles for player {0} are not available")]
    Unavailable(PlayerId),
    #[error("border fetch for player {player} failed: {reason}")]
    Failed { player: PlayerId, reason: String },
    #[error("border reply for player {0} was dropped without a result")]
    Dropped(PlayerId),
}

pub(crate) struct BorderMessage {
    pub epoch: u64,
    pub player: PlayerId,
    pub result: Result<Vec<TileRef>, BorderFetchError>,
}

/// One-shot completion handle for a border tile request.
///
/// The host may fulfil it immediately, later on the same thread, or from a
/// worker thread. Dropping it without calling [`BorderReply::fulfil`] reports
/// [`BorderFetchError::Dropped`].
pub struct BorderReply {
    epoch: u64,
    player: PlayerId,
    sender: Option<Sender<BorderMessage>>,
}

impl BorderReply {
    pub(crate) fn new(epoch: u64, player: PlayerId, sender: Sender<BorderMessage>) -> Self {
        Self {
            epoch,
            player,
            sender: Some(sender),
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn fulfil(mut self, result: Result<Vec<TileRef>, BorderFetchError>) {
        self.send(result);
    }

    fn send(&mut self, result: Result<Vec<TileRef>, BorderFetchError>) {
        if let Some(sender) = self.sender.take() {
            // The engine may have been dropped; nothing left to notify.
            let _ = sender.send(BorderMessage {
                epoch: self.epoch,
                player: self.player,
                result,
            });
        }
    }
}

impl Drop for BorderReply {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.send(Err(BorderFetchError::Dropped(self.player)));
        }
    }
}

impl fmt::Debug for BorderReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorderReply")
            .field("epoch", &self.epoch)
            .field("player", &self.player)
            .field("pending", &self.sender.is_some())
            .finish()
    }
}

/// Queries the fog engine makes against the running game.
pub trait GameView {
    /// Full-resolution map dimensions.
    fn map_size(&self) -> UVec2;

    fn owner_at(&self, x: u32, y: u32) -> Option<PlayerId>;

    fn player_ids(&self) -> Vec<PlayerId>;

    fn is_alive(&self, player: PlayerId) -> bool;

    fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool;

    fn units(&self, player: PlayerId) -> Vec<UnitView>;

    /// Start fetching `player`'s border tiles. Must not block; the result is
    /// delivered through `reply` whenever it is ready.
    fn request_border_tiles(&self, player: PlayerId, reply: BorderReply);
}
