// client.rs — the client table
//
// At most eight participants, remote and local (bots). Remote clients are
// found by source address with a linear scan; id lookups go through the pool
// index and are validated against the generation. Removal is deferred: a
// client marked dead stays addressable until the cleanup stage.

use lwar_common::address::{Address, ADDRESS_NONE};
use lwar_common::clock::Clock;
use lwar_common::id::Id;
use lwar_common::pool::Pool;

use crate::entity;
use crate::player::Player;
use crate::server::Server;

/// Bit-set over client slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientSet(pub u32);

impl ClientSet {
    pub const EMPTY: ClientSet = ClientSet(0);

    pub fn insert(&mut self, n: u16) {
        self.0 |= 1 << n;
    }

    pub fn remove(&mut self, n: u16) {
        self.0 &= !(1 << n);
    }

    pub fn contains(&self, n: u16) -> bool {
        self.0 & (1 << n) != 0
    }

    pub fn disjoint(&self, other: ClientSet) -> bool {
        self.0 & other.0 == 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

pub struct Client {
    pub player: Player,
    pub adr: Address,
    pub ping: u16,

    /// adr is valid; local bots never touch the network.
    pub remote: bool,
    /// Actively disconnected; suppresses the LEAVE broadcast on timeout.
    pub has_left: bool,
    /// Slot will be reclaimed in cleanup, don't start anything new with it.
    pub dead: bool,

    pub next_out_reliable_seqno: u32,
    pub next_out_unreliable_seqno: u32,

    pub last_in_reliable_seqno: u32,
    pub last_in_unreliable_seqno: u32,

    pub last_in_ack: u32,
    pub last_in_frameno: u32,
    pub last_activity: Clock,

    /// Protocol violations; crossing the limit gets the client kicked.
    pub misbehavior: u32,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            player: Player::default(),
            adr: ADDRESS_NONE,
            ping: 0,
            remote: false,
            has_left: false,
            dead: false,
            // outgoing streams start at one; zero is never a valid seqno
            next_out_reliable_seqno: 1,
            next_out_unreliable_seqno: 1,
            last_in_reliable_seqno: 0,
            last_in_unreliable_seqno: 0,
            last_in_ack: 0,
            last_in_frameno: 0,
            last_activity: 0,
            misbehavior: 0,
        }
    }
}

pub fn client_create(sv: &mut Server, adr: &Address) -> Option<u16> {
    let n = sv.clients.alloc()?;
    let id = sv.clients.id(n);
    let c = sv.clients.get_mut(n).expect("freshly allocated");
    c.adr = *adr;
    c.remote = true;
    c.player.id = id;
    sv.connected.insert(n);
    log::debug!("+ client {}", n);
    Some(n)
}

pub fn client_create_local(sv: &mut Server) -> Option<u16> {
    let n = sv.clients.alloc()?;
    let id = sv.clients.id(n);
    let c = sv.clients.get_mut(n).expect("freshly allocated");
    c.adr = ADDRESS_NONE;
    c.remote = false;
    c.player.id = id;
    log::debug!("+ bot {}", n);
    Some(n)
}

pub fn client_remove(sv: &mut Server, n: u16) {
    if let Some(c) = sv.clients.get_mut(n) {
        c.dead = true;
        sv.connected.remove(n);
        log::debug!("- client {}", n);
    }
}

pub fn client_lookup(clients: &Pool<Client>, adr: &Address) -> Option<u16> {
    clients
        .iter()
        .find(|(_, c)| c.remote && c.adr == *adr)
        .map(|(n, _)| n)
}

/// Generation-validated id lookup.
pub fn client_get(clients: &Pool<Client>, player: Id) -> Option<u16> {
    clients.get_id(player).map(|_| player.n)
}

/// Reclaim dead slots. Entities owned by the departing player go with them
/// (marked here, freed in the entity cleanup that follows).
pub fn clients_cleanup(sv: &mut Server) {
    let dead: Vec<u16> = sv
        .clients
        .iter()
        .filter(|(_, c)| c.dead)
        .map(|(n, _)| n)
        .collect();
    for n in dead {
        entity::entities_remove_for(sv, n);
        sv.clients.free(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_CLIENTS;
    use crate::server::Server;
    use std::net::SocketAddr;

    fn adr(port: u16) -> Address {
        Address::from(SocketAddr::from(([10, 0, 0, 1], port)))
    }

    #[test]
    fn lookup_by_address_finds_remotes_only() {
        let mut sv = Server::new();
        let bot = client_create_local(&mut sv).unwrap();
        let a = adr(1000);
        let c = client_create(&mut sv, &a).unwrap();
        assert_eq!(client_lookup(&sv.clients, &a), Some(c));
        assert_eq!(client_lookup(&sv.clients, &adr(2000)), None);
        assert_ne!(client_lookup(&sv.clients, &ADDRESS_NONE), Some(bot));
    }

    #[test]
    fn connected_set_tracks_remotes() {
        let mut sv = Server::new();
        let bot = client_create_local(&mut sv).unwrap();
        let c = client_create(&mut sv, &adr(1)).unwrap();
        assert!(!sv.connected.contains(bot));
        assert!(sv.connected.contains(c));
        client_remove(&mut sv, c);
        assert!(!sv.connected.contains(c));
        // still addressable until cleanup
        assert!(sv.clients.get(c).is_some());
        clients_cleanup(&mut sv);
        assert!(sv.clients.get(c).is_none());
    }

    #[test]
    fn table_caps_at_max_clients() {
        let mut sv = Server::new();
        for i in 0..MAX_CLIENTS {
            assert!(client_create(&mut sv, &adr(i as u16)).is_some());
        }
        assert!(client_create(&mut sv, &adr(99)).is_none());
    }

    #[test]
    fn id_lookup_rejects_stale_generation() {
        let mut sv = Server::new();
        let n = client_create(&mut sv, &adr(1)).unwrap();
        let id = sv.clients.id(n);
        assert_eq!(client_get(&sv.clients, id), Some(n));
        client_remove(&mut sv, n);
        clients_cleanup(&mut sv);
        let n2 = client_create(&mut sv, &adr(2)).unwrap();
        assert_eq!(n, n2, "slot reused");
        assert_eq!(client_get(&sv.clients, id), None, "stale id must not resolve");
    }

    #[test]
    fn seqno_seeds() {
        let c = Client::default();
        assert_eq!(c.next_out_reliable_seqno, 1);
        assert_eq!(c.next_out_unreliable_seqno, 1);
        assert_eq!(c.last_in_reliable_seqno, 0);
    }
}
