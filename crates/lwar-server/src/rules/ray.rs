// rules/ray.rs — the phaser beam
//
// A ray never moves on its own; it hangs off its phaser and traces an
// analytic line-versus-sphere scan every tick, recording how far the beam
// reaches and whom it touches.

use lwar_common::message::UpdateKind;
use lwar_common::vector::{smallest_positive_root, unit, VEC2_ZERO};

use crate::config::NUM_SLOTS;
use crate::entity::{self, EntityType, NO_SLOT};
use crate::rules::TYPE_RAY;
use crate::server::Server;

pub static RAY: EntityType = EntityType {
    id: TYPE_RAY,
    name: "ray",
    act: Some(scan),
    collide: None,
    init_interval: 0,
    init_energy: 0.0,
    init_health: 1.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 0.0,
    // the radius is the beam range
    init_radius: 512.0,
    max_a: VEC2_ZERO,
    max_b: VEC2_ZERO,
    max_rot: 0.0,
    collides: false,
    bounces: false,
    formats: &[UpdateKind::Ray],
    slots: [NO_SLOT; NUM_SLOTS],
};

fn scan(sv: &mut Server, ray: u16) {
    let Some(e) = sv.entities.get(ray) else { return };
    let parent = e.parent;
    let grandparent = parent.and_then(|p| sv.entities.get(p)).and_then(|p| p.parent);

    // the beam dies with its phaser
    let parent_active = parent
        .and_then(|p| sv.entities.get(p))
        .map(|p| p.active && !p.dead)
        .unwrap_or(false);
    if !parent_active {
        entity::entity_remove(sv, ray);
        return;
    }

    let e = sv.entities.get(ray).expect("checked above");
    let origin = e.x;
    let u = unit(e.phi);
    let range = e.radius;

    let mut best: Option<(f32, u16)> = None;
    for n in sv.entities.indices() {
        if n == ray || Some(n) == parent || Some(n) == grandparent {
            continue;
        }
        let Some(o) = sv.entities.get(n) else { continue };
        if o.dead {
            continue;
        }
        let dx = origin - o.x;
        let a = u.dot_sq();
        let b = 2.0 * dx.dot(u);
        let c = dx.dot_sq() - o.radius * o.radius;
        let Some(t) = smallest_positive_root(a, b, c) else { continue };
        if t > range {
            continue;
        }
        if best.map(|(bt, _)| t < bt).unwrap_or(true) {
            best = Some((t, n));
        }
    }

    let (len, target) = match best {
        Some((t, n)) => (t, sv.entities.get(n).map(|o| o.id)),
        None => (range, None),
    };
    let e = sv.entities.get_mut(ray).expect("checked above");
    e.len = len;
    e.target = target;
}
