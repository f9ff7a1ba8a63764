// rules/bullet.rs — plain projectiles

use lwar_common::clock::Clock;
use lwar_common::message::UpdateKind;
use lwar_common::vector::{Real, Vec2, VEC2_ZERO};

use crate::entity::{self, EntityType, NO_SLOT};
use crate::config::NUM_SLOTS;
use crate::rules::TYPE_BULLET;
use crate::server::Server;

const LIFETIME: Clock = 5000;

pub static BULLET: EntityType = EntityType {
    id: TYPE_BULLET,
    name: "bullet",
    act: Some(decay),
    collide: Some(hit),
    init_interval: 100,
    init_energy: 0.0,
    init_health: 100.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 0.1,
    init_radius: 8.0,
    // max_a.y doubles as the muzzle speed of whoever fires one
    max_a: Vec2::new(0.0, 500.0),
    max_b: VEC2_ZERO,
    max_rot: 0.0,
    collides: true,
    bounces: true,
    formats: &[UpdateKind::Pos],
    slots: [NO_SLOT; NUM_SLOTS],
};

fn decay(sv: &mut Server, bullet: u16) {
    if let Some(e) = sv.entities.get_mut(bullet) {
        if e.age > LIFETIME {
            e.health = 0.0;
        }
    }
}

fn hit(sv: &mut Server, bullet: u16, other: u16, impact: Real) {
    // the bounce velocity is kept; only the hull suffers
    let attacker = sv.entities.get(other).and_then(|e| e.player);
    entity::entity_hit(sv, bullet, 0.05 * impact, attacker);
}
