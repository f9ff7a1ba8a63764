// physics.rs — continuous-time integration and collision resolution
//
// Collisions are predicted analytically per entity pair from current
// positions and velocities, queued on a min-heap, and resolved in time order
// within the tick. Velocities changed by an impulse are not re-examined for
// further collisions until the next tick; the remaining time budget of each
// participant is simply spent with the new velocity.

use std::cmp::Ordering;

use lwar_common::clock::{to_time, Time};
use lwar_common::vector::{smallest_positive_root, Real, Vec2, VEC2_ZERO};

use crate::entity::Entity;
use crate::queue;
use crate::server::{PerfTimer, Server};

pub struct Collision {
    pub t: Time,
    pub e: [u16; 2],
    pub x: Vec2,
    pub impact: [Real; 2],
}

pub fn collision_cmp(a: &Collision, b: &Collision) -> Ordering {
    a.t.partial_cmp(&b.t).unwrap_or(Ordering::Equal)
}

/// Earliest future contact of two spheres on their current trajectories.
/// Pairs that already overlap are skipped: they were separate last tick and
/// the impulse that separates them is already in flight, so predicting a
/// contact now would pin them together.
fn collide_at(e0: &Entity, e1: &Entity) -> Option<Time> {
    let r = e0.radius + e1.radius;
    let dx = e0.x - e1.x;
    if dx.dot_sq() < r * r {
        return None;
    }
    let dv = e0.v - e1.v;
    let a = dv.dot_sq();
    if a == 0.0 {
        return None;
    }
    let b = 2.0 * dv.dot(dx);
    let c = dx.dot_sq() - r * r;
    smallest_positive_root(a, b, c)
}

/// 1-D elastic impulse along the collision axis; the perpendicular components
/// pass through. A side with `bounces == false` acts as an immovable wall the
/// other side reflects off.
fn bounce(e0: &mut Entity, e1: &mut Entity) {
    let m0 = e0.mass;
    let m1 = e1.mass;
    let axis = (e0.x - e1.x).normalize();

    let (p0, rest0) = e0.v.project(axis);
    let (p1, rest1) = e1.v.project(axis);

    let v0 = if !e1.bounces {
        rest0 - p0 + p1.scale(2.0)
    } else {
        rest0 + p0.scale((m0 - m1) / (m0 + m1)) + p1.scale(2.0 * m1 / (m0 + m1))
    };
    let v1 = if !e0.bounces {
        rest1 - p1 + p0.scale(2.0)
    } else {
        rest1 + p1.scale((m1 - m0) / (m0 + m1)) + p0.scale(2.0 * m0 / (m0 + m1))
    };

    if e0.bounces {
        e0.v = v0;
    }
    if e1.bounces {
        e1.v = v1;
    }
}

fn advance(e: &mut Entity, t: Time) {
    e.x += e.v.scale(t);
    e.phi += e.rot * t;
    e.remaining -= t;
}

fn find_collisions(sv: &mut Server, dt: Time) {
    let order = sv.entities.indices();
    for (i, &n0) in order.iter().enumerate() {
        let Some(e0) = sv.entities.get(n0) else { continue };
        if e0.dead || !e0.collides || e0.parent.is_some() {
            continue;
        }
        for &n1 in &order[i + 1..] {
            let Some(e1) = sv.entities.get(n1) else { continue };
            if e1.dead || !e1.collides || e1.parent.is_some() {
                continue;
            }
            let e0 = sv.entities.get(n0).expect("checked above");
            if let Some(t) = collide_at(e0, e1) {
                if t <= dt {
                    let c = Collision { t, e: [n0, n1], x: VEC2_ZERO, impact: [0.0, 0.0] };
                    if !sv.collisions.push(c) {
                        log::debug!("collision heap full, deferring {} vs {}", n0, n1);
                    }
                }
            }
        }
    }
}

fn handle_collisions(sv: &mut Server, dt: Time) {
    while let Some(mut c) = sv.collisions.pop_min() {
        let [n0, n1] = c.e;

        // a collide callback earlier in the tick may have removed one side
        let alive = |sv: &Server, n: u16| sv.entities.get(n).map(|e| !e.dead).unwrap_or(false);
        if !alive(sv, n0) || !alive(sv, n1) {
            continue;
        }

        // move both participants to the impact point, clamped to their
        // remaining budget when an earlier event already advanced them
        for n in [n0, n1] {
            let e = sv.entities.get_mut(n).expect("liveness checked");
            let elapsed = dt - e.remaining;
            let step = (c.t - elapsed).clamp(0.0, e.remaining);
            advance(e, step);
        }

        let (cb0, cb1);
        {
            let (e0, e1) = sv.entities.get2_mut(n0, n1).expect("liveness checked");
            let v0_old = e0.v;
            let v1_old = e1.v;
            bounce(e0, e1);
            c.impact = [(e0.v - v0_old).len(), (e1.v - v1_old).len()];

            let (r0, r1) = (e0.radius, e1.radius);
            c.x = e0.x.scale(r0 / (r0 + r1)) + e1.x.scale(r1 / (r0 + r1));

            cb0 = e0.etype.collide;
            cb1 = e1.etype.collide;
        }

        if let Some(cb) = cb0 {
            cb(sv, n0, n1, c.impact[0]);
        }
        if let Some(cb) = cb1 {
            cb(sv, n1, n0, c.impact[1]);
        }
        queue::queue_collision(sv, &c);
    }
}

fn slave_children(sv: &mut Server, parent: u16) {
    let Some(p) = sv.entities.get(parent) else { return };
    let (px, pv, pphi) = (p.x, p.v, p.phi);
    for child in p.children.clone() {
        if let Some(ch) = sv.entities.get_mut(child) {
            ch.x = px + ch.dx.rotate(pphi);
            ch.v = pv;
            ch.phi = pphi + ch.dphi;
        }
        slave_children(sv, child);
    }
}

pub fn physics_update(sv: &mut Server) {
    sv.perf.start(PerfTimer::Physics);
    let dt = to_time(sv.clock_delta());

    for n in sv.entities.indices() {
        let Some(e) = sv.entities.get_mut(n) else { continue };
        if e.dead {
            continue;
        }
        e.remaining = dt;
        if e.parent.is_none() {
            e.v += e.a.scale(dt);
        }
    }

    find_collisions(sv, dt);
    handle_collisions(sv, dt);

    for n in sv.entities.indices() {
        let Some(e) = sv.entities.get_mut(n) else { continue };
        if e.dead {
            continue;
        }
        if e.parent.is_none() {
            let left = e.remaining;
            advance(e, left);
        }
        e.a = VEC2_ZERO;
        e.rot = 0.0;
    }

    for n in sv.entities.indices() {
        let is_root_parent = sv
            .entities
            .get(n)
            .map(|e| e.parent.is_none() && !e.children.is_empty())
            .unwrap_or(false);
        if is_root_parent {
            slave_children(sv, n);
        }
    }

    sv.perf.stop(PerfTimer::Physics);
}
