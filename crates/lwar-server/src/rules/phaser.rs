// rules/phaser.rs — slot-mounted beam weapon
//
// While active the phaser keeps exactly one ray child alive; the ray removes
// itself as soon as the phaser goes quiet.

use lwar_common::vector::{unit, Vec2, VEC2_ZERO};

use crate::config::NUM_SLOTS;
use crate::entity::{self, EntityType, NO_SLOT};
use crate::rules::{TYPE_PHASER, TYPE_RAY};
use crate::server::Server;

pub static PHASER: EntityType = EntityType {
    id: TYPE_PHASER,
    name: "phaser",
    act: Some(shoot),
    collide: None,
    init_interval: 0,
    init_energy: 1000.0,
    init_health: 1.0,
    init_shield: 1.0,
    init_len: 0.0,
    init_mass: 0.0,
    init_radius: 0.0,
    max_a: VEC2_ZERO,
    max_b: VEC2_ZERO,
    max_rot: 0.0,
    collides: false,
    bounces: false,
    formats: &[],
    slots: [NO_SLOT; NUM_SLOTS],
};

fn shoot(sv: &mut Server, phaser: u16) {
    let Some(e) = sv.entities.get(phaser) else { return };
    if !e.children.is_empty() {
        return;
    }
    let Some(ray_type) = entity::entity_type_get(sv, TYPE_RAY) else { return };

    let dx = Vec2::new(e.radius, 0.0);
    let x = e.x + unit(e.phi).scale(e.radius);
    let player = e.player;
    let Some(ray) = entity::entity_create(sv, ray_type, player, x, VEC2_ZERO) else {
        return;
    };
    entity::entity_attach(sv, phaser, ray, dx, 0.0);
    sv.entities.get_mut(ray).expect("just created").active = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{entities_cleanup, entities_update, entity_create};
    use crate::rules;
    use crate::server::Server;

    #[test]
    fn active_phaser_maintains_one_ray() {
        let mut sv = Server::new();
        rules::init(&mut sv);
        let phaser = entity_create(&mut sv, &PHASER, None, VEC2_ZERO, VEC2_ZERO).unwrap();
        sv.entities.get_mut(phaser).unwrap().active = true;

        sv.force_clocks(1000, 1016);
        entities_update(&mut sv);
        assert_eq!(sv.entities.get(phaser).unwrap().children.len(), 1);

        // a second activation does not stack rays
        sv.force_clocks(1016, 1032);
        entities_update(&mut sv);
        assert_eq!(sv.entities.get(phaser).unwrap().children.len(), 1);

        // deactivate: the ray removes itself on its next scan
        sv.entities.get_mut(phaser).unwrap().active = false;
        sv.force_clocks(1032, 1048);
        entities_update(&mut sv);
        entities_cleanup(&mut sv);
        assert!(sv.entities.get(phaser).unwrap().children.is_empty());
        assert_eq!(sv.entities.len(), 1, "only the phaser remains");
    }
}
