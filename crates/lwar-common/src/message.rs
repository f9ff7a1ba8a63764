// message.rs — the lwar message set
//
// Tags are wire-stable numbers; the reliability class of a message is a pure
// function of its tag (below 100 reliable, 100 and up unreliable). Every
// message carries a non-zero per-stream sequence number packed right after
// the tag. Update messages (110..=114) are headers only: the fixed-size
// per-entity records that follow are packed by the format layer.

use crate::id::Id;
use crate::wire::{Reader, Writer};

/// Magic prefix of every non-discovery datagram.
pub const APP_ID: u32 = 0xf270_87c5;

pub const MAX_STATS: usize = 8;

// ============================================================
// Tags
// ============================================================

pub const TAG_CONNECT: u8 = 1;
pub const TAG_JOIN: u8 = 3;
pub const TAG_LEAVE: u8 = 4;
pub const TAG_CHAT: u8 = 5;
pub const TAG_ADD: u8 = 6;
pub const TAG_REMOVE: u8 = 7;
pub const TAG_SELECTION: u8 = 8;
pub const TAG_NAME: u8 = 9;
pub const TAG_SYNCED: u8 = 10;
pub const TAG_KILL: u8 = 11;

pub const TAG_STATS: u8 = 101;
pub const TAG_INPUT: u8 = 103;
pub const TAG_COLLISION: u8 = 105;
pub const TAG_DISCONNECT: u8 = 106;
pub const TAG_REJECT: u8 = 107;

pub const TAG_UPDATE: u8 = 110;
pub const TAG_UPDATE_POS: u8 = 111;
pub const TAG_UPDATE_RAY: u8 = 112;
pub const TAG_UPDATE_CIRCLE: u8 = 113;
pub const TAG_UPDATE_SHIP: u8 = 114;

pub const TAG_DISCOVERY: u32 = 200;

// ============================================================
// Reason codes
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaveReason {
    Quit = 1,
    Dropped = 2,
    Misbehaved = 3,
}

impl LeaveReason {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Quit),
            2 => Some(Self::Dropped),
            3 => Some(Self::Misbehaved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    Full = 1,
    VersionMismatch = 2,
}

impl RejectReason {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Full),
            2 => Some(Self::VersionMismatch),
            _ => None,
        }
    }
}

// ============================================================
// Update kinds
// ============================================================

/// The five snapshot record layouts, one per update tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    PosRot,
    Pos,
    Ray,
    Circle,
    Ship,
}

pub const UPDATE_KINDS: [UpdateKind; 5] = [
    UpdateKind::PosRot,
    UpdateKind::Pos,
    UpdateKind::Ray,
    UpdateKind::Circle,
    UpdateKind::Ship,
];

impl UpdateKind {
    pub fn tag(self) -> u8 {
        match self {
            UpdateKind::PosRot => TAG_UPDATE,
            UpdateKind::Pos => TAG_UPDATE_POS,
            UpdateKind::Ray => TAG_UPDATE_RAY,
            UpdateKind::Circle => TAG_UPDATE_CIRCLE,
            UpdateKind::Ship => TAG_UPDATE_SHIP,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_UPDATE => Some(UpdateKind::PosRot),
            TAG_UPDATE_POS => Some(UpdateKind::Pos),
            TAG_UPDATE_RAY => Some(UpdateKind::Ray),
            TAG_UPDATE_CIRCLE => Some(UpdateKind::Circle),
            TAG_UPDATE_SHIP => Some(UpdateKind::Ship),
            _ => None,
        }
    }
}

// ============================================================
// Header / discovery frames
// ============================================================

/// Leads every non-discovery datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub app_id: u32,
    pub ack: u32,
}

impl Header {
    pub fn new(ack: u32) -> Self {
        Self { app_id: APP_ID, ack }
    }

    pub fn pack(&self, w: &mut Writer) {
        w.put_u32(self.app_id);
        w.put_u32(self.ack);
    }

    pub fn unpack(r: &mut Reader) -> Option<Header> {
        let app_id = r.get_u32()?;
        let ack = r.get_u32()?;
        Some(Header { app_id, ack })
    }
}

/// Standalone multicast announcement; no header, no seqno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub app_id: u32,
    pub rev: u8,
    pub port: u16,
}

impl Discovery {
    pub fn pack(&self, w: &mut Writer) {
        w.put_u32(TAG_DISCOVERY);
        w.put_u32(self.app_id);
        w.put_u8(self.rev);
        w.put_u16(self.port);
    }

    pub fn unpack(r: &mut Reader) -> Option<Discovery> {
        if r.get_u32()? != TAG_DISCOVERY {
            return None;
        }
        let app_id = r.get_u32()?;
        let rev = r.get_u8()?;
        let port = r.get_u16()?;
        Some(Discovery { app_id, rev, port })
    }
}

// ============================================================
// Messages
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsInfo {
    pub player: Id,
    pub kills: u16,
    pub deaths: u16,
    pub ping: u16,
}

/// One button sample set of an INPUT frame. Each field is the raw per-frame
/// bit history byte from the client; the protocol driver folds dropped
/// frames with a mask before latching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputButtons {
    pub forwards: u8,
    pub backwards: u8,
    pub turn_left: u8,
    pub turn_right: u8,
    pub strafe_left: u8,
    pub strafe_right: u8,
    pub fire: [u8; 4],
}

impl InputButtons {
    pub fn masked(&self, mask: u8) -> InputButtons {
        InputButtons {
            forwards: self.forwards & mask,
            backwards: self.backwards & mask,
            turn_left: self.turn_left & mask,
            turn_right: self.turn_right & mask,
            strafe_left: self.strafe_left & mask,
            strafe_right: self.strafe_right & mask,
            fire: [
                self.fire[0] & mask,
                self.fire[1] & mask,
                self.fire[2] & mask,
                self.fire[3] & mask,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Connect { rev: u8, nick: String },
    Join { player: Id, nick: String },
    Leave { player: Id, reason: LeaveReason },
    Chat { player: Id, msg: String },
    Add { entity: Id, player: Id, type_id: u8 },
    Remove { entity: Id },
    Selection { player: Id, ship_type: u8, weapon_types: [u8; 4] },
    Name { player: Id, nick: String },
    Synced,
    Kill { killer: Id, victim: Id },
    Stats { info: Vec<StatsInfo> },
    Input { player: Id, frameno: u32, buttons: InputButtons, aim_x: i16, aim_y: i16 },
    Collision { entities: [Id; 2], x: i16, y: i16 },
    Disconnect,
    Reject { reason: RejectReason },
    Update { kind: UpdateKind, n: u8 },
    /// A tag this revision does not know. Carried so the dispatcher can score
    /// it as misbehavior; the payload length is unknowable, so scanning the
    /// containing packet stops here.
    Unknown { tag: u8 },
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Connect { .. } => TAG_CONNECT,
            Message::Join { .. } => TAG_JOIN,
            Message::Leave { .. } => TAG_LEAVE,
            Message::Chat { .. } => TAG_CHAT,
            Message::Add { .. } => TAG_ADD,
            Message::Remove { .. } => TAG_REMOVE,
            Message::Selection { .. } => TAG_SELECTION,
            Message::Name { .. } => TAG_NAME,
            Message::Synced => TAG_SYNCED,
            Message::Kill { .. } => TAG_KILL,
            Message::Stats { .. } => TAG_STATS,
            Message::Input { .. } => TAG_INPUT,
            Message::Collision { .. } => TAG_COLLISION,
            Message::Disconnect => TAG_DISCONNECT,
            Message::Reject { .. } => TAG_REJECT,
            Message::Update { kind, .. } => kind.tag(),
            Message::Unknown { tag } => *tag,
        }
    }

    /// Reliability is decided by tag value alone.
    pub fn is_reliable(&self) -> bool {
        self.tag() < 100
    }

    pub fn is_update(&self) -> bool {
        (TAG_UPDATE..=TAG_UPDATE_SHIP).contains(&self.tag())
    }

    pub fn pack(&self, seqno: u32, w: &mut Writer) {
        debug_assert!(seqno != 0);
        w.put_u8(self.tag());
        w.put_u32(seqno);
        match self {
            Message::Connect { rev, nick } => {
                w.put_u8(*rev);
                w.put_str(nick);
            }
            Message::Join { player, nick } => {
                w.put_id(*player);
                w.put_str(nick);
            }
            Message::Leave { player, reason } => {
                w.put_id(*player);
                w.put_u8(*reason as u8);
            }
            Message::Chat { player, msg } => {
                w.put_id(*player);
                w.put_str(msg);
            }
            Message::Add { entity, player, type_id } => {
                w.put_id(*entity);
                w.put_id(*player);
                w.put_u8(*type_id);
            }
            Message::Remove { entity } => {
                w.put_id(*entity);
            }
            Message::Selection { player, ship_type, weapon_types } => {
                w.put_id(*player);
                w.put_u8(*ship_type);
                for t in weapon_types {
                    w.put_u8(*t);
                }
            }
            Message::Name { player, nick } => {
                w.put_id(*player);
                w.put_str(nick);
            }
            Message::Synced => {}
            Message::Kill { killer, victim } => {
                w.put_id(*killer);
                w.put_id(*victim);
            }
            Message::Stats { info } => {
                w.put_u8(info.len() as u8);
                for s in info {
                    w.put_id(s.player);
                    w.put_u16(s.kills);
                    w.put_u16(s.deaths);
                    w.put_u16(s.ping);
                }
            }
            Message::Input { player, frameno, buttons, aim_x, aim_y } => {
                w.put_id(*player);
                w.put_u32(*frameno);
                w.put_u8(buttons.forwards);
                w.put_u8(buttons.backwards);
                w.put_u8(buttons.turn_left);
                w.put_u8(buttons.turn_right);
                w.put_u8(buttons.strafe_left);
                w.put_u8(buttons.strafe_right);
                for f in &buttons.fire {
                    w.put_u8(*f);
                }
                w.put_i16(*aim_x);
                w.put_i16(*aim_y);
            }
            Message::Collision { entities, x, y } => {
                w.put_id(entities[0]);
                w.put_id(entities[1]);
                w.put_i16(*x);
                w.put_i16(*y);
            }
            Message::Disconnect => {}
            Message::Reject { reason } => {
                w.put_u8(*reason as u8);
            }
            Message::Update { n, .. } => {
                w.put_u8(*n);
            }
            Message::Unknown { .. } => {}
        }
    }

    /// Decode one message. `None` means a framing error; the caller drops the
    /// rest of the packet.
    pub fn unpack(r: &mut Reader) -> Option<(u32, Message)> {
        let tag = r.get_u8()?;
        let seqno = r.get_u32()?;
        if seqno == 0 {
            return None;
        }
        let m = match tag {
            TAG_CONNECT => Message::Connect { rev: r.get_u8()?, nick: r.get_str()? },
            TAG_JOIN => Message::Join { player: r.get_id()?, nick: r.get_str()? },
            TAG_LEAVE => Message::Leave {
                player: r.get_id()?,
                reason: LeaveReason::from_u8(r.get_u8()?)?,
            },
            TAG_CHAT => Message::Chat { player: r.get_id()?, msg: r.get_str()? },
            TAG_ADD => Message::Add {
                entity: r.get_id()?,
                player: r.get_id()?,
                type_id: r.get_u8()?,
            },
            TAG_REMOVE => Message::Remove { entity: r.get_id()? },
            TAG_SELECTION => Message::Selection {
                player: r.get_id()?,
                ship_type: r.get_u8()?,
                weapon_types: [r.get_u8()?, r.get_u8()?, r.get_u8()?, r.get_u8()?],
            },
            TAG_NAME => Message::Name { player: r.get_id()?, nick: r.get_str()? },
            TAG_SYNCED => Message::Synced,
            TAG_KILL => Message::Kill { killer: r.get_id()?, victim: r.get_id()? },
            TAG_STATS => {
                let n = r.get_u8()? as usize;
                if n > MAX_STATS {
                    return None;
                }
                let mut info = Vec::with_capacity(n);
                for _ in 0..n {
                    info.push(StatsInfo {
                        player: r.get_id()?,
                        kills: r.get_u16()?,
                        deaths: r.get_u16()?,
                        ping: r.get_u16()?,
                    });
                }
                Message::Stats { info }
            }
            TAG_INPUT => Message::Input {
                player: r.get_id()?,
                frameno: r.get_u32()?,
                buttons: InputButtons {
                    forwards: r.get_u8()?,
                    backwards: r.get_u8()?,
                    turn_left: r.get_u8()?,
                    turn_right: r.get_u8()?,
                    strafe_left: r.get_u8()?,
                    strafe_right: r.get_u8()?,
                    fire: [r.get_u8()?, r.get_u8()?, r.get_u8()?, r.get_u8()?],
                },
                aim_x: r.get_i16()?,
                aim_y: r.get_i16()?,
            },
            TAG_COLLISION => Message::Collision {
                entities: [r.get_id()?, r.get_id()?],
                x: r.get_i16()?,
                y: r.get_i16()?,
            },
            TAG_DISCONNECT => Message::Disconnect,
            TAG_REJECT => Message::Reject { reason: RejectReason::from_u8(r.get_u8()?)? },
            _ => match UpdateKind::from_tag(tag) {
                Some(kind) => Message::Update { kind, n: r.get_u8()? },
                None => Message::Unknown { tag },
            },
        };
        Some((seqno, m))
    }
}
