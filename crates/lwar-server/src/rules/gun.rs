// rules/gun.rs — slot-mounted bullet gun

use lwar_common::vector::{unit, VEC2_ZERO};

use crate::config::NUM_SLOTS;
use crate::entity::{self, EntityType, NO_SLOT};
use crate::rules::{TYPE_BULLET, TYPE_GUN};
use crate::server::Server;

pub static GUN: EntityType = EntityType {
    id: TYPE_GUN,
    name: "gun",
    act: Some(shoot),
    collide: None,
    init_interval: 300,
    // ammunition
    init_energy: 1000.0,
    init_health: 1.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 0.0,
    init_radius: 8.0,
    max_a: VEC2_ZERO,
    max_b: VEC2_ZERO,
    max_rot: 0.0,
    collides: false,
    bounces: false,
    formats: &[],
    slots: [NO_SLOT; NUM_SLOTS],
};

/// Fire a bullet from the mounting ship's nose while ammunition lasts.
fn shoot(sv: &mut Server, gun: u16) {
    let Some(e) = sv.entities.get(gun) else { return };
    if e.energy <= 0.0 {
        return;
    }
    let Some(ship) = e.parent.and_then(|p| sv.entities.get(p)) else { return };
    let Some(bullet) = entity::entity_type_get(sv, TYPE_BULLET) else { return };

    let f = unit(ship.phi);
    let x = ship.x + f.scale(ship.radius + bullet.init_radius * 2.0);
    let v = ship.v + f.scale(bullet.max_a.y);
    let player = e.player;

    sv.entities.get_mut(gun).expect("checked above").energy -= 1.0;
    if let Some(b) = entity::entity_create(sv, bullet, player, x, v) {
        sv.entities.get_mut(b).expect("just created").active = true;
    }
}
