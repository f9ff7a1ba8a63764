// player.rs — player state, input latching, selection, and spawning

use rand::Rng;

use lwar_common::id::Id;
use lwar_common::message::InputButtons;
use lwar_common::vector::{rad, unit, Real, Vec2, VEC2_ZERO};

use crate::config::{AIM_DEADZONE, MAX_NAME_LENGTH, MAX_PLANETS, MIN_PLANET_DIST, NUM_SLOTS};
use crate::entity::{self, type_bit, EntityType, SlotRef};
use crate::server::Server;

#[derive(Default, Clone, Copy)]
pub struct PlayerSlot {
    pub entity: Option<u16>,
    pub selected_type: Option<&'static EntityType>,
}

pub struct Player {
    pub id: Id,
    pub name: String,

    pub ship: PlayerSlot,
    pub weapons: [PlayerSlot; NUM_SLOTS],
    pub kills: u16,
    pub deaths: u16,

    /// Latched input: thrust axes in [-1, 1], turn fraction, aim vector.
    pub a: Vec2,
    pub rot: Real,
    pub aim: Vec2,
}

impl Default for Player {
    fn default() -> Self {
        Player {
            id: Id::default(),
            name: String::new(),
            ship: PlayerSlot::default(),
            weapons: [PlayerSlot::default(); NUM_SLOTS],
            kills: 0,
            deaths: 0,
            a: VEC2_ZERO,
            rot: 0.0,
            aim: VEC2_ZERO,
        }
    }
}

fn pressed(b: u8) -> f32 {
    (b != 0) as u32 as f32
}

/// Latch a folded input sample into the player and the weapon actives.
pub fn player_input(sv: &mut Server, c: u16, buttons: &InputButtons, aim_x: i16, aim_y: i16) {
    let weapons;
    {
        let Some(client) = sv.clients.get_mut(c) else { return };
        let p = &mut client.player;
        p.a.x = pressed(buttons.forwards) - pressed(buttons.backwards);
        p.a.y = pressed(buttons.strafe_right) - pressed(buttons.strafe_left);

        let aim = Vec2::new(aim_x as f32, aim_y as f32);
        if aim.len() >= AIM_DEADZONE {
            p.aim = aim;
        }
        weapons = p.weapons;
    }
    for (i, slot) in weapons.iter().enumerate() {
        if let Some(e) = slot.entity.and_then(|n| sv.entities.get_mut(n)) {
            e.active = buttons.fire[i] != 0;
        }
    }
}

/// Record the ship/weapon loadout choice. Unknown type ids clear the slot.
pub fn player_select(sv: &mut Server, c: u16, ship_type: u8, weapon_types: [u8; 4]) {
    let ship = entity::entity_type_get(sv, ship_type);
    let weapons = weapon_types.map(|t| entity::entity_type_get(sv, t));
    let Some(client) = sv.clients.get_mut(c) else { return };
    client.player.ship.selected_type = ship;
    for (slot, t) in client.player.weapons.iter_mut().zip(weapons) {
        slot.selected_type = t;
    }
}

pub fn player_rename(sv: &mut Server, c: u16, name: &str) {
    if let Some(client) = sv.clients.get_mut(c) {
        let mut name = name.to_owned();
        name.truncate(MAX_NAME_LENGTH);
        client.player.name = name;
    }
}

/// Spawn the selected ship at `x` and mount the selected weapons onto its
/// attachment slots. Slots refuse types outside their allowed set.
pub fn player_spawn(sv: &mut Server, c: u16, x: Vec2) {
    let Some(client) = sv.clients.get(c) else { return };
    if client.player.ship.entity.is_some() {
        return;
    }
    let Some(ship_type) = client.player.ship.selected_type else { return };

    let Some(ship) = entity::entity_create(sv, ship_type, Some(c), x, VEC2_ZERO) else {
        return;
    };
    sv.entities.get_mut(ship).expect("just created").slot = Some(SlotRef::Ship);
    sv.clients.get_mut(c).expect("caller checked").player.ship.entity = Some(ship);

    for i in 0..NUM_SLOTS {
        let selected = sv.clients.get(c).and_then(|cl| cl.player.weapons[i].selected_type);
        let Some(t) = selected else { continue };
        let st = ship_type.slots[i];
        if st.possible_types & type_bit(t.id) == 0 {
            continue;
        }
        // position and velocity are overridden as soon as the attachment
        // slaves the weapon to the ship
        let Some(w) = entity::entity_create(sv, t, Some(c), VEC2_ZERO, VEC2_ZERO) else {
            continue;
        };
        entity::entity_attach(sv, ship, w, st.dx, st.dphi);
        sv.entities.get_mut(w).expect("just created").slot = Some(SlotRef::Weapon(i));
        sv.clients.get_mut(c).expect("caller checked").player.weapons[i].entity = Some(w);
    }
}

/// Keep the player's slot table honest when one of its entities dies. A dead
/// ship also clears the selection, so respawn waits for the next SELECTION.
pub fn player_notify_entity(sv: &mut Server, n: u16) {
    let Some(e) = sv.entities.get(n) else { return };
    if !e.dead {
        return;
    }
    let (Some(slot), Some(c)) = (e.slot, e.player) else { return };
    log::debug!("- slot of client {}, entity {}", c, n);
    match slot {
        SlotRef::Ship => {
            player_select(sv, c, 0, [0; 4]);
            if let Some(client) = sv.clients.get_mut(c) {
                client.player.ship.entity = None;
            }
        }
        SlotRef::Weapon(i) => {
            if let Some(client) = sv.clients.get_mut(c) {
                client.player.weapons[i].entity = None;
            }
        }
    }
}

/// Turn the latched input into ship acceleration and rotation.
fn player_action(sv: &mut Server, c: u16) {
    let Some(client) = sv.clients.get(c) else { return };
    let p = &client.player;
    let Some(ship) = p.ship.entity else { return };
    let Some(e) = sv.entities.get(ship) else { return };

    let t = e.etype;
    let v_local = Vec2::new(p.a.x * t.max_a.x * 0.5, p.a.y * t.max_a.y * 0.5);
    let v_world = v_local.rotate(e.phi);
    let thrusting = p.a.x != 0.0 || p.a.y != 0.0;

    let rot = if p.aim.len() > 0.0 {
        let q = p.aim.rotate(-e.phi).normalize();
        Some(q.arctan() / std::f32::consts::PI)
    } else {
        None
    };

    if let Some(rot) = rot {
        if let Some(client) = sv.clients.get_mut(c) {
            client.player.rot = rot;
        }
        entity::entity_rotate(sv, ship, rot);
    }
    if thrusting {
        entity::entity_accelerate_to(sv, ship, v_world);
    }
}

/// Spawn ships for shipless players and translate everyone's input.
pub fn players_update(sv: &mut Server) {
    for c in sv.clients.indices() {
        let alive = sv.clients.get(c).map(|cl| !cl.dead).unwrap_or(false);
        if !alive {
            continue;
        }
        let needs_ship =
            sv.clients.get(c).map(|cl| cl.player.ship.entity.is_none()).unwrap_or(false);
        if needs_ship {
            // somewhere on the inner planet rings
            let ring = sv.rng.gen_range(0..(MAX_PLANETS - 5)) as f32;
            let dist = 4000.0 + (ring + 1.0) * MIN_PLANET_DIST + MIN_PLANET_DIST / 2.0;
            let phi = rad(sv.rng.gen_range(0.0..360.0));
            player_spawn(sv, c, unit(phi).scale(dist));
        }
        player_action(sv, c);
    }
}
