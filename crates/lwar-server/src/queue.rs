// queue.rs — the outbound message queue
//
// Every queued message carries a destination bit-set over client slots plus
// per-client delivery metadata. Unreliable messages go out once per
// destination; reliable ones are retransmitted on a timer until the client's
// piggybacked ack covers their seqno. A message is reclaimed once no
// connected client still has its bit set.

use lwar_common::clock::Clock;
use lwar_common::id::ID_NONE;
use lwar_common::message::{LeaveReason, Message, StatsInfo};
use lwar_common::pool::Pool;

use crate::client::{Client, ClientSet};
use crate::config::{MAX_CLIENTS, RETRANSMIT_INTERVAL};
use crate::physics::Collision;
use crate::server::Server;

#[derive(Debug, Clone, Copy, Default)]
pub struct PerClient {
    pub seqno: u32,
    pub tries: u32,
    pub last_tx: Clock,
}

pub struct QueuedMessage {
    pub msg: Message,
    pub dest: ClientSet,
    pub per_client: [PerClient; MAX_CLIENTS],
}

impl Default for QueuedMessage {
    fn default() -> Self {
        QueuedMessage {
            msg: Message::Synced,
            dest: ClientSet::EMPTY,
            per_client: [PerClient::default(); MAX_CLIENTS],
        }
    }
}

fn qm_create(sv: &mut Server, msg: Message) -> Option<u16> {
    let Some(n) = sv.queue.alloc() else {
        log::error!("message queue exhausted, dropping tag {}", msg.tag());
        return None;
    };
    sv.queue.get_mut(n).expect("freshly allocated").msg = msg;
    Some(n)
}

/// Stamp the per-destination seqno from the sending side of the client's
/// reliable or unreliable stream and mark the destination bit.
fn qm_enqueue(qm: &mut QueuedMessage, c: &mut Client, n: u16) {
    qm.dest.insert(n);
    let pc = &mut qm.per_client[n as usize];
    pc.seqno = if qm.msg.is_reliable() {
        let s = c.next_out_reliable_seqno;
        c.next_out_reliable_seqno += 1;
        s
    } else {
        let s = c.next_out_unreliable_seqno;
        c.next_out_unreliable_seqno += 1;
        s
    };
    pc.tries = 0;
    pc.last_tx = 0;
}

pub fn queue_unicast(sv: &mut Server, c: u16, msg: Message) {
    let Some(qi) = qm_create(sv, msg) else { return };
    let Server { queue, clients, .. } = sv;
    let qm = queue.get_mut(qi).expect("just allocated");
    if let Some(client) = clients.get_mut(c) {
        qm_enqueue(qm, client, c);
    }
}

pub fn queue_broadcast(sv: &mut Server, msg: Message) {
    let Some(qi) = qm_create(sv, msg) else { return };
    let Server { queue, clients, .. } = sv;
    let qm = queue.get_mut(qi).expect("just allocated");
    for n in clients.indices() {
        let client = clients.get_mut(n).expect("index snapshot");
        if client.dead {
            continue;
        }
        qm_enqueue(qm, client, n);
    }
}

// ============================================================
// Relevance and the send cursor
// ============================================================

/// One relevance decision per (client, message) per send pass. May clear the
/// destination bit (unreliable sent, or reliable acknowledged) and stamps the
/// transmission time of a reliable send.
fn qm_check_relevant(qm: &mut QueuedMessage, n: u16, c: &Client, now: Clock) -> bool {
    if !qm.dest.contains(n) {
        return false;
    }

    // unreliable: exactly once per destination
    if !qm.msg.is_reliable() {
        qm.dest.remove(n);
        return true;
    }

    let pc = &mut qm.per_client[n as usize];
    if pc.tries > 0 && pc.last_tx + RETRANSMIT_INTERVAL >= now {
        return false;
    }
    pc.last_tx = now;

    // already acknowledged
    if pc.seqno <= c.last_in_ack {
        qm.dest.remove(n);
        return false;
    }

    true
}

/// Resumable iterator over one client's sendable messages. The position
/// survives across datagram flushes within a tick; `tries` of the previously
/// yielded message is bumped when the caller comes back for the next one.
pub struct QueueCursor {
    order: Vec<u16>,
    pos: usize,
    yielded: Option<u16>,
}

impl QueueCursor {
    pub fn new(queue: &Pool<QueuedMessage>) -> Self {
        QueueCursor { order: queue.indices(), pos: 0, yielded: None }
    }

    /// Next relevant message for client `c`: (queue slot, stamped seqno,
    /// tries so far).
    pub fn next(
        &mut self,
        queue: &mut Pool<QueuedMessage>,
        clients: &Pool<Client>,
        c: u16,
        now: Clock,
    ) -> Option<(u16, u32, u32)> {
        if let Some(prev) = self.yielded.take() {
            if let Some(qm) = queue.get_mut(prev) {
                qm.per_client[c as usize].tries += 1;
            }
        }
        let client = clients.get(c)?;
        while self.pos < self.order.len() {
            let qi = self.order[self.pos];
            self.pos += 1;
            let Some(qm) = queue.get_mut(qi) else { continue };
            if !qm_check_relevant(qm, c, client, now) {
                continue;
            }
            let pc = &qm.per_client[c as usize];
            self.yielded = Some(qi);
            return Some((qi, pc.seqno, pc.tries));
        }
        None
    }
}

/// Reclaim messages no connected client still needs.
pub fn queue_cleanup(sv: &mut Server) {
    let connected = sv.connected;
    sv.queue.free_pred(|_, qm| qm.dest.disjoint(connected));
}

// ============================================================
// Event constructors
// ============================================================

pub fn queue_join(sv: &mut Server, c: u16) {
    let Some(client) = sv.clients.get(c) else { return };
    let msg = Message::Join { player: client.player.id, nick: client.player.name.clone() };
    queue_broadcast(sv, msg);
}

pub fn queue_leave(sv: &mut Server, c: u16, reason: LeaveReason) {
    let Some(client) = sv.clients.get(c) else { return };
    let msg = Message::Leave { player: client.player.id, reason };
    queue_broadcast(sv, msg);
}

/// Timeout removal broadcasts a LEAVE unless the client already said goodbye.
pub fn queue_timeout(sv: &mut Server, c: u16) {
    let announce = sv.clients.get(c).map(|cl| !cl.has_left).unwrap_or(false);
    if announce {
        queue_leave(sv, c, LeaveReason::Dropped);
    }
}

pub fn queue_add(sv: &mut Server, e: u16) {
    let Some(entity) = sv.entities.get(e) else { return };
    debug_assert!(!entity.dead);
    let player = entity
        .player
        .and_then(|p| sv.clients.get(p))
        .map(|c| c.player.id)
        .unwrap_or(ID_NONE);
    let msg = Message::Add { entity: entity.id, player, type_id: entity.etype.id };
    queue_broadcast(sv, msg);
}

pub fn queue_remove(sv: &mut Server, e: u16) {
    let Some(entity) = sv.entities.get(e) else { return };
    let msg = Message::Remove { entity: entity.id };
    queue_broadcast(sv, msg);
}

pub fn queue_kill(sv: &mut Server, killer: u16, victim: u16) {
    let k = sv.clients.get(killer).map(|c| c.player.id).unwrap_or(ID_NONE);
    let v = sv.clients.get(victim).map(|c| c.player.id).unwrap_or(ID_NONE);
    queue_broadcast(sv, Message::Kill { killer: k, victim: v });
}

pub fn queue_collision(sv: &mut Server, col: &Collision) {
    let ids = [
        sv.entities.get(col.e[0]).map(|e| e.id).unwrap_or(ID_NONE),
        sv.entities.get(col.e[1]).map(|e| e.id).unwrap_or(ID_NONE),
    ];
    let msg = Message::Collision {
        entities: ids,
        x: col.x.x.clamp(i16::MIN as f32, i16::MAX as f32) as i16,
        y: col.x.y.clamp(i16::MIN as f32, i16::MAX as f32) as i16,
    };
    queue_broadcast(sv, msg);
}

pub fn queue_stats(sv: &mut Server) {
    let info: Vec<StatsInfo> = sv
        .clients
        .iter()
        .filter(|(_, c)| !c.dead)
        .map(|(_, c)| StatsInfo {
            player: c.player.id,
            kills: c.player.kills,
            deaths: c.player.deaths,
            ping: c.ping,
        })
        .collect();
    queue_broadcast(sv, Message::Stats { info });
}

/// Rebroadcast a client-originated message (chat, selection, rename).
pub fn queue_forward(sv: &mut Server, msg: Message) {
    queue_broadcast(sv, msg);
}

/// Everything a fresh client needs to catch up: who is here, what exists,
/// and a marker that the snapshot is complete.
pub fn queue_gamestate_for(sv: &mut Server, c: u16) {
    for other in sv.clients.indices() {
        if other == c {
            continue;
        }
        let Some(cl) = sv.clients.get(other) else { continue };
        if cl.dead {
            continue;
        }
        let msg = Message::Join { player: cl.player.id, nick: cl.player.name.clone() };
        queue_unicast(sv, c, msg);
    }
    for e in sv.entities.indices() {
        let Some(entity) = sv.entities.get(e) else { continue };
        if entity.dead || entity.etype.formats.is_empty() {
            continue;
        }
        let player = entity
            .player
            .and_then(|p| sv.clients.get(p))
            .map(|cl| cl.player.id)
            .unwrap_or(ID_NONE);
        let msg = Message::Add { entity: entity.id, player, type_id: entity.etype.id };
        queue_unicast(sv, c, msg);
    }
    queue_unicast(sv, c, Message::Synced);
}
