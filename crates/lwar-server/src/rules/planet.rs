// rules/planet.rs — gravitational bodies

use lwar_common::message::UpdateKind;
use lwar_common::vector::{rad, unit, Vec2, VEC2_ZERO};
use rand::Rng;

use crate::config::{MAX_PLANETS, MIN_PLANET_DIST, NUM_SLOTS};
use crate::entity::{self, EntityType, NO_SLOT};
use crate::rules::TYPE_PLANET;
use crate::server::Server;

const GRAVITY_FACTOR: f32 = 10000.0;

pub static PLANET: EntityType = EntityType {
    id: TYPE_PLANET,
    name: "planet",
    act: Some(gravity),
    collide: None,
    init_interval: 0,
    init_energy: 0.0,
    init_health: 1000.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 10000.0,
    init_radius: 128.0,
    max_a: VEC2_ZERO,
    max_b: VEC2_ZERO,
    max_rot: 0.0,
    collides: true,
    bounces: true,
    formats: &[UpdateKind::Circle],
    slots: [NO_SLOT; NUM_SLOTS],
};

/// Pull everything that has mass toward this body. The acceleration grows
/// with the inverse of the victim's mass, so light entities feel the well
/// more strongly; other planets are exempt so the sky stays put.
fn gravity(sv: &mut Server, planet: u16) {
    let Some(p) = sv.entities.get(planet) else { return };
    let m0 = p.mass;
    let x0 = p.x;

    for n in sv.entities.indices() {
        if n == planet {
            continue;
        }
        let Some(e) = sv.entities.get(n) else { continue };
        if e.dead || std::ptr::eq(e.etype, &PLANET) {
            continue;
        }
        let m1 = e.mass;
        if m1 <= 0.0 {
            continue;
        }
        let dx = x0 - e.x;
        let l2 = dx.dot_sq();
        if l2 == 0.0 {
            continue;
        }
        let a = dx.normalize().scale(GRAVITY_FACTOR * (m0 + m1) / m1 / l2);
        entity::entity_push(sv, n, a);
    }
}

/// Populate the world: a heavy central body and planets on concentric rings.
pub fn spawn_planets(sv: &mut Server) {
    let Some(t) = entity::entity_type_get(sv, TYPE_PLANET) else { return };

    if let Some(sun) = entity::entity_create(sv, t, None, VEC2_ZERO, VEC2_ZERO) {
        let e = sv.entities.get_mut(sun).expect("just created");
        e.mass *= 10.0;
        e.radius *= 4.0;
        e.active = true;
    }
    for i in 1..MAX_PLANETS {
        let dist = 4000.0 + i as f32 * MIN_PLANET_DIST;
        let phi = rad(sv.rng.gen_range(0.0..360.0));
        let x = unit(phi).scale(dist);
        if let Some(n) = entity::entity_create(sv, t, None, x, VEC2_ZERO) {
            sv.entities.get_mut(n).expect("just created").active = true;
        }
    }
}
