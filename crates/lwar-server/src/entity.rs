// entity.rs — entities, entity types, and the attachment tree
//
// An entity's type is an immutable static descriptor carrying the gameplay
// callbacks and initial scalars. Entities themselves live in the server's
// pool; cross-references (owner, parent, children) are slot indices, valid
// because nothing is reclaimed mid-tick: removal marks `dead` and the slot is
// freed only in the cleanup stage after the send pass.

use lwar_common::clock::{clock_periodic, Clock, Time};
use lwar_common::id::Id;
use lwar_common::message::UpdateKind;
use lwar_common::vector::{Real, Vec2, VEC2_ZERO};

use crate::config::{MAX_ENTITY_TYPES, NUM_SLOTS};
use crate::format;
use crate::player;
use crate::queue;
use crate::server::Server;

pub type ActFn = fn(&mut Server, u16);
pub type CollideFn = fn(&mut Server, u16, u16, Real);

/// Bit-set over entity type ids, for slot attachment rules.
pub type TypeSet = u32;

pub const fn type_bit(id: u8) -> TypeSet {
    1 << id
}

#[derive(Clone, Copy)]
pub struct SlotType {
    pub dx: Vec2,
    pub dphi: Real,
    pub possible_types: TypeSet,
}

pub const NO_SLOT: SlotType = SlotType { dx: VEC2_ZERO, dphi: 0.0, possible_types: 0 };

pub struct EntityType {
    pub id: u8,
    pub name: &'static str,

    pub act: Option<ActFn>,
    pub collide: Option<CollideFn>,

    /// Cadence of the act callback while the entity is active.
    pub init_interval: Clock,

    pub init_energy: Real,
    pub init_health: Real,
    pub init_shield: Real,
    pub init_len: Real,
    pub init_mass: Real,
    pub init_radius: Real,

    pub max_a: Vec2,
    pub max_b: Vec2,
    pub max_rot: Real,

    pub collides: bool,
    pub bounces: bool,

    /// Snapshot formats this type's entities are members of.
    pub formats: &'static [UpdateKind],

    pub slots: [SlotType; NUM_SLOTS],
}

/// Placeholder descriptor for pool slots that have never been created.
static UNTYPED: EntityType = EntityType {
    id: 0,
    name: "untyped",
    act: None,
    collide: None,
    init_interval: 0,
    init_energy: 0.0,
    init_health: 0.0,
    init_shield: 0.0,
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

/// Which player slot an entity occupies, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Ship,
    Weapon(usize),
}

pub struct Entity {
    pub id: Id,
    pub etype: &'static EntityType,
    pub dead: bool,
    pub age: Clock,

    /// Owning client slot.
    pub player: Option<u16>,

    pub parent: Option<u16>,
    pub children: Vec<u16>,
    pub slot: Option<SlotRef>,
    pub target: Option<Id>,

    pub active: bool,
    pub interval: Clock,
    pub periodic: Clock,

    pub x: Vec2,
    pub v: Vec2,
    pub a: Vec2,
    pub phi: Real,
    pub rot: Real,

    /// Placement relative to the parent while attached.
    pub dx: Vec2,
    pub dphi: Real,

    pub energy: Real,
    pub health: Real,
    pub shield: Real,
    pub len: Real,
    pub mass: Real,
    pub radius: Real,
    pub remaining: Time,

    pub collides: bool,
    pub bounces: bool,
}

impl Default for Entity {
    fn default() -> Self {
        Entity {
            id: Id::default(),
            etype: &UNTYPED,
            dead: false,
            age: 0,
            player: None,
            parent: None,
            children: Vec::new(),
            slot: None,
            target: None,
            active: false,
            interval: 0,
            periodic: 0,
            x: VEC2_ZERO,
            v: VEC2_ZERO,
            a: VEC2_ZERO,
            phi: 0.0,
            rot: 0.0,
            dx: VEC2_ZERO,
            dphi: 0.0,
            energy: 0.0,
            health: 0.0,
            shield: 0.0,
            len: 0.0,
            mass: 0.0,
            radius: 0.0,
            remaining: 0.0,
            collides: false,
            bounces: false,
        }
    }
}

// ============================================================
// Type registry
// ============================================================

pub fn entity_type_register(sv: &mut Server, t: &'static EntityType) {
    let id = t.id as usize;
    assert!(id < MAX_ENTITY_TYPES);
    sv.types[id] = Some(t);
}

pub fn entity_type_get(sv: &Server, id: u8) -> Option<&'static EntityType> {
    sv.types.get(id as usize).copied().flatten()
}

// ============================================================
// Lifecycle
// ============================================================

/// Allocate and initialize an entity from its type's defaults. Announces it
/// through the format system if the type carries one.
pub fn entity_create(
    sv: &mut Server,
    t: &'static EntityType,
    player: Option<u16>,
    x: Vec2,
    v: Vec2,
) -> Option<u16> {
    let Some(n) = sv.entities.alloc() else {
        log::error!("entity pool exhausted, dropping spawn of {}", t.name);
        return None;
    };
    let id = sv.entities.id(n);
    let e = sv.entities.get_mut(n).expect("freshly allocated");
    e.id = id;
    e.etype = t;
    e.player = player;
    e.x = x;
    e.v = v;
    e.interval = t.init_interval;
    e.energy = t.init_energy;
    e.health = t.init_health;
    e.shield = t.init_shield;
    e.len = t.init_len;
    e.mass = t.init_mass;
    e.radius = t.init_radius;
    e.collides = t.collides;
    e.bounces = t.bounces;

    format::formats_insert(&mut sv.formats, t, n);
    if !t.formats.is_empty() {
        queue::queue_add(sv, n);
    }
    log::debug!("+ entity {} ({})", n, t.name);
    Some(n)
}

/// Attach `child` to `parent` at the given relative placement. The child
/// stops moving on its own; its pose is re-slaved to the parent every tick.
pub fn entity_attach(sv: &mut Server, parent: u16, child: u16, dx: Vec2, dphi: Real) {
    assert_ne!(parent, child);
    {
        let c = sv.entities.get_mut(child).expect("attach of dead child");
        assert!(c.parent.is_none(), "entity already attached");
        c.parent = Some(parent);
        c.dx = dx;
        c.dphi = dphi;
    }
    // an attachment cycle would orphan the subtree from the physics pass
    let mut up = Some(parent);
    while let Some(n) = up {
        assert_ne!(n, child, "attachment cycle");
        up = sv.entities.get(n).and_then(|e| e.parent);
    }
    let p = sv.entities.get_mut(parent).expect("attach to dead parent");
    p.children.push(child);
}

/// Mark an entity (and its attachment subtree) for removal. Slots are freed
/// in the cleanup stage; the REMOVE broadcast is queued immediately.
pub fn entity_remove(sv: &mut Server, n: u16) {
    let Some(e) = sv.entities.get_mut(n) else { return };
    if e.dead {
        return;
    }
    e.dead = true;
    let children = e.children.clone();
    let has_format = !e.etype.formats.is_empty();
    log::debug!("- entity {} ({})", n, e.etype.name);

    player::player_notify_entity(sv, n);
    if has_format {
        queue::queue_remove(sv, n);
    }
    for c in children {
        entity_remove(sv, c);
    }
}

/// Mark every entity owned by a departing player.
pub fn entities_remove_for(sv: &mut Server, client: u16) {
    for n in sv.entities.indices() {
        let owned = sv.entities.get(n).map(|e| e.player == Some(client)).unwrap_or(false);
        if owned {
            entity_remove(sv, n);
        }
    }
}

// ============================================================
// Per-tick update
// ============================================================

/// Age entities and fire the periodic act callbacks. An entity whose health
/// has run out is removed here, after its own act had the chance to notice.
pub fn entities_update(sv: &mut Server) {
    let delta = sv.clock_delta();
    for n in sv.entities.indices() {
        let Some(e) = sv.entities.get_mut(n) else { continue };
        if e.dead {
            continue;
        }
        e.age += delta;

        let mut act = None;
        if e.active {
            if clock_periodic(&mut e.periodic, e.interval, delta) {
                act = e.etype.act;
            }
        } else {
            e.periodic = 0;
        }
        if let Some(act) = act {
            act(sv, n);
        }

        let expired = sv
            .entities
            .get(n)
            .map(|e| !e.dead && e.etype.init_health > 0.0 && e.health <= 0.0)
            .unwrap_or(false);
        if expired {
            entity_remove(sv, n);
        }
    }
}

/// Reclaim dead entities after the send pass so queued broadcasts could still
/// reference their slots.
pub fn entities_cleanup(sv: &mut Server) {
    let dead: Vec<u16> = sv
        .entities
        .iter()
        .filter(|(_, e)| e.dead)
        .map(|(n, _)| n)
        .collect();
    for n in dead {
        format::formats_remove(&mut sv.formats, n);
        let parent = sv.entities.get(n).and_then(|e| e.parent);
        if let Some(p) = parent.and_then(|p| sv.entities.get_mut(p)) {
            p.children.retain(|&c| c != n);
        }
        sv.entities.free(n);
    }
}

// ============================================================
// Forces and damage
// ============================================================

/// Accumulate a world-frame acceleration.
pub fn entity_push(sv: &mut Server, n: u16, a: Vec2) {
    if let Some(e) = sv.entities.get_mut(n) {
        e.a += a;
    }
}

/// Accelerate in the entity's own frame, clamped to the type's thrust and
/// brake limits per axis.
pub fn entity_accelerate(sv: &mut Server, n: u16, a: Vec2) {
    if let Some(e) = sv.entities.get_mut(n) {
        let t = e.etype;
        let local = Vec2::new(
            a.x.clamp(-t.max_b.x, t.max_a.x),
            a.y.clamp(-t.max_b.y, t.max_a.y),
        );
        e.a += local.rotate(e.phi);
    }
}

/// Accelerate toward the given absolute velocity, limited by the type caps.
pub fn entity_accelerate_to(sv: &mut Server, n: u16, v: Vec2) {
    if let Some(e) = sv.entities.get_mut(n) {
        let local = (v - e.v).rotate(-e.phi);
        let phi = e.phi;
        let t = e.etype;
        let clamped = Vec2::new(
            local.x.clamp(-t.max_b.x, t.max_a.x),
            local.y.clamp(-t.max_b.y, t.max_a.y),
        );
        e.a += clamped.rotate(phi);
    }
}

/// Rotate at a fraction of the type's turn rate, `r` in [-1, 1].
pub fn entity_rotate(sv: &mut Server, n: u16, r: Real) {
    if let Some(e) = sv.entities.get_mut(n) {
        e.rot = r.clamp(-1.0, 1.0) * e.etype.max_rot;
    }
}

/// Apply damage, scaled by the victim's shield factor. Credits the attacker
/// when this kills a player-owned entity.
pub fn entity_hit(sv: &mut Server, n: u16, damage: Real, attacker: Option<u16>) {
    let Some(e) = sv.entities.get_mut(n) else { return };
    if e.dead {
        return;
    }
    e.health -= damage * e.shield;
    if e.health > 0.0 {
        return;
    }
    let victim = e.player;
    entity_remove(sv, n);
    if let (Some(v), Some(k)) = (victim, attacker) {
        if v != k {
            if let Some(c) = sv.clients.get_mut(k) {
                c.player.kills += 1;
            }
            if let Some(c) = sv.clients.get_mut(v) {
                c.player.deaths += 1;
            }
            queue::queue_kill(sv, k, v);
        }
    }
}
