// config.rs — protocol, capacity, and gameplay constants

use lwar_common::clock::Clock;

// ============================================================
// Network
// ============================================================

pub const NETWORK_REVISION: u8 = 28;
pub const SERVER_PORT: u16 = 32422;

/// Discovery runs one port above the game port.
pub const MULTICAST_GROUP: &str = "FF05::3";
pub const MULTICAST_HOPS: u32 = 1;

/// Send throttle when the host does not force a flush.
pub const UPDATE_INTERVAL: Clock = 30;

/// Drop a connection after fifteen silent seconds.
pub const TIMEOUT_INTERVAL: Clock = 15 * 1000;

pub const RETRANSMIT_INTERVAL: Clock = 100;
pub const DISCOVERY_INTERVAL: Clock = 5 * 1000;
pub const STATS_INTERVAL: Clock = 1000;

// ============================================================
// Capacity
// ============================================================

pub const MAX_CLIENTS: usize = 8;
pub const MAX_ENTITIES: usize = 4096;
pub const MAX_ENTITY_TYPES: usize = 32;
/// Should be n^2-1 for the priority queue.
pub const MAX_COLLISIONS: usize = 32;
pub const MAX_QUEUE: usize = 4096;

pub const NUM_SLOTS: usize = 4;

pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_CHAT_LENGTH: usize = 256;

// ============================================================
// Gameplay
// ============================================================

pub const MISBEHAVIOR_LIMIT: u32 = 10;

pub const MAX_PLANETS: usize = 11;
pub const MIN_PLANET_DIST: f32 = 2500.0;

/// Aim vectors shorter than this are ignored.
pub const AIM_DEADZONE: f32 = 24.0;
