// rules/ship.rs — the player ship

use lwar_common::message::UpdateKind;
use lwar_common::vector::{unit, Real, Vec2};

use crate::entity::{self, type_bit, EntityType, SlotType};
use crate::rules::{TYPE_BULLET, TYPE_GUN, TYPE_PHASER, TYPE_ROCKET, TYPE_SHIP};
use crate::server::Server;

const WEAPON_TYPES: u32 = type_bit(TYPE_GUN) | type_bit(TYPE_PHASER) | type_bit(TYPE_ROCKET);

const MOUNT: f32 = 24.0;

pub static SHIP: EntityType = EntityType {
    id: TYPE_SHIP,
    name: "ship",
    act: Some(shoot),
    collide: Some(hit),
    init_interval: 300,
    init_energy: 0.0,
    init_health: 200.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 1.0,
    init_radius: 32.0,
    max_a: Vec2::new(200.0, 200.0),
    max_b: Vec2::new(200.0, 200.0),
    max_rot: 3.0,
    collides: true,
    bounces: true,
    formats: &[UpdateKind::PosRot, UpdateKind::Ship],
    slots: [
        SlotType { dx: Vec2::new(MOUNT, 0.0), dphi: 0.0, possible_types: WEAPON_TYPES },
        SlotType { dx: Vec2::new(-MOUNT, 0.0), dphi: 0.0, possible_types: WEAPON_TYPES },
        SlotType { dx: Vec2::new(0.0, MOUNT), dphi: 0.0, possible_types: WEAPON_TYPES },
        SlotType { dx: Vec2::new(0.0, -MOUNT), dphi: 0.0, possible_types: WEAPON_TYPES },
    ],
};

/// The hull itself can fire straight ahead when active.
fn shoot(sv: &mut Server, ship: u16) {
    let Some(e) = sv.entities.get(ship) else { return };
    let Some(bullet) = entity::entity_type_get(sv, TYPE_BULLET) else { return };

    let f = unit(e.phi);
    let x = e.x + f.scale(e.radius + bullet.init_radius * 2.0);
    let v = e.v + f.scale(bullet.max_a.y);
    let player = e.player;
    if let Some(b) = entity::entity_create(sv, bullet, player, x, v) {
        sv.entities.get_mut(b).expect("just created").active = true;
    }
}

fn hit(sv: &mut Server, ship: u16, other: u16, impact: Real) {
    let attacker = sv.entities.get(other).and_then(|e| e.player);
    entity::entity_hit(sv, ship, 0.1 * impact, attacker);
}
