// format.rs — snapshot update formats
//
// A format groups the live entities that emit identical fixed-size records in
// the state snapshot. The protocol layer batches each format's membership
// into UPDATE messages, chunked to the datagram limit using the fixed record
// length.

use lwar_common::id::ID_NONE;
use lwar_common::message::{UpdateKind, UPDATE_KINDS};
use lwar_common::vector::deg100;
use lwar_common::wire::Writer;

use crate::client::Client;
use crate::entity::{Entity, EntityType};
use lwar_common::pool::Pool;

pub struct Format {
    pub kind: UpdateKind,
    pub record_len: usize,
    pub members: Vec<u16>,
}

/// One format per update kind, in `UPDATE_KINDS` order.
pub fn formats_init() -> Vec<Format> {
    UPDATE_KINDS
        .iter()
        .map(|&kind| Format { kind, record_len: record_len(kind), members: Vec::new() })
        .collect()
}

/// Fixed wire size of one record of the given kind.
pub fn record_len(kind: UpdateKind) -> usize {
    match kind {
        UpdateKind::PosRot => 4 + 2 + 2 + 2,
        UpdateKind::Pos => 4 + 2 + 2,
        UpdateKind::Ray => 4 + 2 + 2 + 2 + 2 + 4,
        UpdateKind::Circle => 4 + 2 + 2 + 2,
        UpdateKind::Ship => 4 + 1 + 1 + 4,
    }
}

pub fn formats_insert(formats: &mut [Format], t: &'static EntityType, n: u16) {
    for f in formats.iter_mut() {
        if t.formats.contains(&f.kind) {
            f.members.push(n);
        }
    }
}

pub fn formats_remove(formats: &mut [Format], n: u16) {
    for f in formats.iter_mut() {
        f.members.retain(|&m| m != n);
    }
}

fn pct(value: f32, initial: f32) -> u8 {
    if initial <= 0.0 {
        return 0;
    }
    (100.0 * value / initial).clamp(0.0, 100.0) as u8
}

/// Pack one per-entity record. The ship record reaches through the owning
/// player's weapon slots, hence the pool arguments.
pub fn pack_record(
    kind: UpdateKind,
    e: &Entity,
    entities: &Pool<Entity>,
    clients: &Pool<Client>,
    w: &mut Writer,
) {
    match kind {
        UpdateKind::PosRot => {
            w.put_id(e.id);
            w.put_i16(e.x.x as i16);
            w.put_i16(e.x.y as i16);
            w.put_u16(deg100(e.phi));
        }
        UpdateKind::Pos => {
            w.put_id(e.id);
            w.put_i16(e.x.x as i16);
            w.put_i16(e.x.y as i16);
        }
        UpdateKind::Ray => {
            w.put_id(e.id);
            w.put_i16(e.x.x as i16);
            w.put_i16(e.x.y as i16);
            w.put_u16(deg100(e.phi));
            w.put_u16(e.len.clamp(0.0, u16::MAX as f32) as u16);
            w.put_id(e.target.unwrap_or(ID_NONE));
        }
        UpdateKind::Circle => {
            w.put_id(e.id);
            w.put_i16(e.x.x as i16);
            w.put_i16(e.x.y as i16);
            w.put_u16(e.radius.clamp(0.0, u16::MAX as f32) as u16);
        }
        UpdateKind::Ship => {
            w.put_id(e.id);
            w.put_u8(pct(e.health, e.etype.init_health));
            w.put_u8(pct(e.shield, e.etype.init_shield));
            let player = e.player.and_then(|p| clients.get(p));
            for i in 0..crate::config::NUM_SLOTS {
                let energy = player
                    .and_then(|c| c.player.weapons[i].entity)
                    .and_then(|n| entities.get(n))
                    .map(|we| pct(we.energy, we.etype.init_energy))
                    .unwrap_or(0);
                w.put_u8(energy);
            }
        }
    }
}
