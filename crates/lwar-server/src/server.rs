// server.rs — the server aggregate and tick orchestration
//
// Exactly one Server owns everything: the pools, the collision heap, the
// format lists, and both sockets. The host drives it with a monotonic
// millisecond clock; each tick runs the stages in fixed order. No module
// keeps its own mutable state.

use std::io;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use lwar_common::clock::{clock_periodic, Clock};
use lwar_common::pool::Pool;
use lwar_common::pq::MinHeap;

use crate::client::{Client, ClientSet};
use crate::config::{
    DISCOVERY_INTERVAL, MAX_CLIENTS, MAX_COLLISIONS, MAX_ENTITIES, MAX_ENTITY_TYPES, MAX_QUEUE,
    MULTICAST_GROUP, STATS_INTERVAL,
};
use crate::conn::Endpoint;
use crate::entity::{Entity, EntityType};
use crate::format::{formats_init, Format};
use crate::physics::{collision_cmp, Collision};
use crate::protocol;
use crate::queue::{self, QueuedMessage};
use crate::rules;
use crate::{client, entity, physics, player};

// ============================================================
// Performance instrumentation hooks
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfTimer {
    Recv,
    Send,
    Entities,
    Physics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfCounter {
    Recv,
    Send,
    Resend,
}

/// Host-registered measurement callbacks; all optional.
#[derive(Default, Clone, Copy)]
pub struct PerfCallbacks {
    pub timer_start: Option<fn(PerfTimer)>,
    pub timer_stop: Option<fn(PerfTimer)>,
    pub counted: Option<fn(PerfCounter, u32)>,
}

impl PerfCallbacks {
    pub fn start(&self, t: PerfTimer) {
        if let Some(f) = self.timer_start {
            f(t);
        }
    }

    pub fn stop(&self, t: PerfTimer) {
        if let Some(f) = self.timer_stop {
            f(t);
        }
    }

    pub fn count(&self, c: PerfCounter, value: u32) {
        if let Some(f) = self.counted {
            f(c, value);
        }
    }
}

/// Per-tick traffic counters.
#[derive(Default, Clone, Copy)]
pub struct TickStats {
    pub nsend: u32,
    pub nresend: u32,
    pub nrecv: u32,
}

// ============================================================
// Server
// ============================================================

pub struct Server {
    pub running: bool,

    pub clients: Pool<Client>,
    pub connected: ClientSet,

    pub entities: Pool<Entity>,
    pub queue: Pool<QueuedMessage>,
    pub types: [Option<&'static EntityType>; MAX_ENTITY_TYPES],
    pub formats: Vec<Format>,
    pub collisions: MinHeap<Collision>,

    pub conn_clients: Option<Endpoint>,
    pub conn_discovery: Option<Endpoint>,

    pub cur_clock: Clock,
    pub prev_clock: Clock,
    pub update_periodic: Clock,
    pub discovery_periodic: Clock,
    pub stats_periodic: Clock,

    pub rng: SmallRng,
    pub perf: PerfCallbacks,
    pub stats: TickStats,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Bare state: pools and formats, no types registered, no sockets, no
    /// world. `init` is the full package.
    pub fn new() -> Server {
        Server {
            running: false,
            clients: Pool::new(MAX_CLIENTS),
            connected: ClientSet::EMPTY,
            entities: Pool::new(MAX_ENTITIES),
            queue: Pool::new(MAX_QUEUE),
            types: [None; MAX_ENTITY_TYPES],
            formats: formats_init(),
            collisions: MinHeap::new(MAX_COLLISIONS, collision_cmp),
            conn_clients: None,
            conn_discovery: None,
            cur_clock: 0,
            prev_clock: 0,
            update_periodic: 0,
            discovery_periodic: 0,
            stats_periodic: 0,
            rng: SmallRng::from_entropy(),
            perf: PerfCallbacks::default(),
            stats: TickStats::default(),
        }
    }

    /// Bind the sockets, register the gameplay rules, and populate the
    /// world. Pass port 0 for an ephemeral port.
    pub fn init(port: u16) -> io::Result<Server> {
        let mut sv = Server::new();
        sv.conn_clients = Some(Endpoint::bind(port)?);
        match Endpoint::multicast(MULTICAST_GROUP) {
            Ok(ep) => sv.conn_discovery = Some(ep),
            // a host without multicast still runs, it just stays invisible
            Err(e) => log::warn!("discovery disabled: {}", e),
        }

        rules::init(&mut sv);
        rules::spawn_planets(&mut sv);

        sv.running = true;
        log::info!("initialized on port {}", sv.port().unwrap_or(0));
        Ok(sv)
    }

    /// The bound game port, once `init` has run.
    pub fn port(&self) -> Option<u16> {
        self.conn_clients.as_ref().map(|c| c.port())
    }

    pub fn clock_delta(&self) -> Clock {
        self.cur_clock.saturating_sub(self.prev_clock)
    }

    fn time_update(&mut self, now: Clock) {
        self.prev_clock = self.cur_clock;
        self.cur_clock = now;
    }

    /// Test hook: pin the tick clocks directly.
    #[cfg(test)]
    pub fn force_clocks(&mut self, prev: Clock, cur: Clock) {
        self.prev_clock = prev;
        self.cur_clock = cur;
    }

    /// One server tick. `force` bypasses the send throttle. Returns false
    /// once the server has been shut down.
    pub fn tick(&mut self, now: Clock, force: bool) -> bool {
        if !self.running {
            return false;
        }
        self.time_update(now);

        // the first frame only arms the clock
        if self.prev_clock == 0 {
            return true;
        }
        let delta = self.clock_delta();

        if clock_periodic(&mut self.discovery_periodic, DISCOVERY_INTERVAL, delta) {
            protocol::send_discovery(self);
        }

        protocol::protocol_recv(self);

        player::players_update(self);

        self.perf.start(PerfTimer::Entities);
        entity::entities_update(self);
        self.perf.stop(PerfTimer::Entities);

        physics::physics_update(self);

        if clock_periodic(&mut self.stats_periodic, STATS_INTERVAL, delta) {
            queue::queue_stats(self);
        }

        protocol::protocol_send(self, force);

        // obsolete messages before clients before entities: message
        // reclamation looks at the connected set, entity reclamation at the
        // dying clients' ownership
        queue::queue_cleanup(self);
        client::clients_cleanup(self);
        entity::entities_cleanup(self);

        true
    }

    pub fn shutdown(mut self) {
        self.running = false;
        log::info!("terminated");
    }
}
