// rules/rocket.rs — homing rockets
//
// The same type serves twice: mounted on a ship slot it is a launcher that
// spawns free-flying copies while the fire button is held; once free it hunts
// the nearest target ahead of its nose.

use lwar_common::message::UpdateKind;
use lwar_common::vector::{unit, Real, Vec2, VEC2_ZERO};

use crate::config::NUM_SLOTS;
use crate::entity::{self, EntityType, NO_SLOT};
use crate::rules::TYPE_ROCKET;
use crate::server::Server;

pub static ROCKET: EntityType = EntityType {
    id: TYPE_ROCKET,
    name: "rocket",
    act: Some(act),
    collide: Some(hit),
    init_interval: 100,
    init_energy: 10.0,
    init_health: 100.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 1.0,
    init_radius: 16.0,
    max_a: Vec2::new(500.0, 20.0),
    max_b: Vec2::new(20.0, 20.0),
    max_rot: 1.0,
    collides: true,
    bounces: true,
    formats: &[UpdateKind::PosRot],
    slots: [NO_SLOT; NUM_SLOTS],
};

fn act(sv: &mut Server, rocket: u16) {
    let mounted = sv.entities.get(rocket).map(|e| e.parent.is_some()).unwrap_or(false);
    if mounted {
        launch(sv, rocket);
    } else {
        aim(sv, rocket);
    }
}

/// Launcher mode: spend ammunition to release a live rocket ahead of the
/// mounting ship.
fn launch(sv: &mut Server, launcher: u16) {
    let Some(e) = sv.entities.get(launcher) else { return };
    if e.energy <= 0.0 {
        return;
    }
    let Some(ship) = e.parent.and_then(|p| sv.entities.get(p)) else { return };

    let f = unit(ship.phi);
    let x = ship.x + f.scale(ship.radius + ROCKET.init_radius * 2.0);
    let v = ship.v + f.scale(100.0);
    let phi = ship.phi;
    let player = e.player;

    sv.entities.get_mut(launcher).expect("checked above").energy -= 1.0;
    if let Some(r) = entity::entity_create(sv, &ROCKET, player, x, v) {
        let e = sv.entities.get_mut(r).expect("just created");
        e.phi = phi;
        e.active = true;
    }
}

/// Free flight: pick the most head-on target ahead, thrust toward it, and
/// turn the nose over.
fn aim(sv: &mut Server, rocket: u16) {
    let Some(me) = sv.entities.get(rocket) else { return };
    let my_player = me.player;
    let my_x = me.x;
    let my_phi = me.phi;

    let mut best: Option<(Vec2, u16)> = None;
    for n in sv.entities.indices() {
        if n == rocket {
            continue;
        }
        let Some(e) = sv.entities.get(n) else { continue };
        if e.dead || e.player == my_player {
            continue;
        }
        let dx = e.x - my_x;
        if dx.dot_sq() == 0.0 {
            continue;
        }
        // desired flight direction, in the rocket's frame
        let v = dx.rotate(-my_phi).normalize();
        if v.x < 0.0 {
            continue; // behind us
        }
        if best.map(|(bv, _)| v.y.abs() < bv.y.abs()).unwrap_or(true) {
            best = Some((v, n));
        }
    }

    match best {
        Some((v, n)) => {
            let align = 1.0 - v.y.abs();
            let speed = ROCKET.max_a.len() * align * align;
            let v_world = v.scale(speed).rotate(my_phi);
            let target = sv.entities.get(n).map(|e| e.id);
            if let Some(e) = sv.entities.get_mut(rocket) {
                e.target = target;
            }
            entity::entity_accelerate_to(sv, rocket, v_world);
            entity::entity_rotate(sv, rocket, v.y);
        }
        None => {
            if let Some(e) = sv.entities.get_mut(rocket) {
                e.target = None;
            }
            entity::entity_accelerate_to(sv, rocket, VEC2_ZERO);
        }
    }
}

fn hit(sv: &mut Server, rocket: u16, other: u16, impact: Real) {
    let attacker = sv.entities.get(other).and_then(|e| e.player);
    entity::entity_hit(sv, rocket, 0.1 * impact, attacker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::client_create_local;
    use crate::entity::{entity_create, entity_type_get};
    use crate::rules;
    use crate::server::Server;

    #[test]
    fn aims_at_most_head_on_target_ahead() {
        let mut sv = Server::new();
        rules::init(&mut sv);
        let owner = client_create_local(&mut sv).unwrap();
        let victim = client_create_local(&mut sv).unwrap();
        let st = entity_type_get(&sv, rules::TYPE_SHIP).unwrap();

        let r = entity_create(&mut sv, &ROCKET, Some(owner), VEC2_ZERO, VEC2_ZERO).unwrap();
        // facing +x; one target dead ahead, one off to the side, one behind
        let ahead = entity_create(&mut sv, st, Some(victim), Vec2::new(500.0, 10.0), VEC2_ZERO).unwrap();
        entity_create(&mut sv, st, Some(victim), Vec2::new(300.0, 400.0), VEC2_ZERO).unwrap();
        entity_create(&mut sv, st, Some(victim), Vec2::new(-200.0, 0.0), VEC2_ZERO).unwrap();

        aim(&mut sv, r);

        let rocket = sv.entities.get(r).unwrap();
        let ahead_id = sv.entities.get(ahead).unwrap().id;
        assert_eq!(rocket.target, Some(ahead_id));
        assert!(rocket.a.x > 0.0, "thrusting forward, got {:?}", rocket.a);
    }

    #[test]
    fn ignores_own_player() {
        let mut sv = Server::new();
        rules::init(&mut sv);
        let owner = client_create_local(&mut sv).unwrap();
        let st = entity_type_get(&sv, rules::TYPE_SHIP).unwrap();
        let r = entity_create(&mut sv, &ROCKET, Some(owner), VEC2_ZERO, VEC2_ZERO).unwrap();
        entity_create(&mut sv, st, Some(owner), Vec2::new(500.0, 0.0), VEC2_ZERO).unwrap();

        aim(&mut sv, r);
        assert_eq!(sv.entities.get(r).unwrap().target, None);
    }

    #[test]
    fn mounted_rocket_launches_copies() {
        let mut sv = Server::new();
        rules::init(&mut sv);
        let owner = client_create_local(&mut sv).unwrap();
        let st = entity_type_get(&sv, rules::TYPE_SHIP).unwrap();
        let ship = entity_create(&mut sv, st, Some(owner), VEC2_ZERO, VEC2_ZERO).unwrap();
        let launcher = entity_create(&mut sv, &ROCKET, Some(owner), VEC2_ZERO, VEC2_ZERO).unwrap();
        entity::entity_attach(&mut sv, ship, launcher, Vec2::new(24.0, 0.0), 0.0);

        let before = sv.entities.len();
        act(&mut sv, launcher);
        assert_eq!(sv.entities.len(), before + 1);
        assert_eq!(sv.entities.get(launcher).unwrap().energy, ROCKET.init_energy - 1.0);

        // ammunition runs dry
        sv.entities.get_mut(launcher).unwrap().energy = 0.0;
        act(&mut sv, launcher);
        assert_eq!(sv.entities.len(), before + 1);
    }
}
