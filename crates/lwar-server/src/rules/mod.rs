// rules/mod.rs — per-type gameplay callbacks and type registration

mod bullet;
mod gun;
mod phaser;
mod planet;
mod ray;
mod rocket;
mod ship;

pub use planet::spawn_planets;

use crate::entity::entity_type_register;
use crate::server::Server;

pub const TYPE_SHIP: u8 = 1;
pub const TYPE_BULLET: u8 = 2;
pub const TYPE_PLANET: u8 = 3;
pub const TYPE_ROCKET: u8 = 4;
pub const TYPE_RAY: u8 = 5;
pub const TYPE_GUN: u8 = 6;
pub const TYPE_PHASER: u8 = 7;

pub fn init(sv: &mut Server) {
    entity_type_register(sv, &ship::SHIP);
    entity_type_register(sv, &bullet::BULLET);
    entity_type_register(sv, &planet::PLANET);
    entity_type_register(sv, &rocket::ROCKET);
    entity_type_register(sv, &ray::RAY);
    entity_type_register(sv, &gun::GUN);
    entity_type_register(sv, &phaser::PHASER);
}
