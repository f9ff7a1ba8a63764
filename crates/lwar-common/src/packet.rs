// packet.rs — bounded datagram build/consume buffer
//
// A packet is a 512-byte window with start/end cursors. Packing past the
// datagram limit is a recoverable signal: the writer lands in the slack
// region past the limit, the commit is refused, and the caller flushes and
// retries. The slack is sized for the largest single message (a full-length
// chat), so a refused pack never writes out of bounds.

use crate::wire::{Reader, Writer};

pub const MAX_PACKET_LENGTH: usize = 512;

/// app_id + ack.
pub const HEADER_LENGTH: usize = 8;

/// Update batch header: tag, seqno, record count.
pub const UPDATE_HEADER_LENGTH: usize = 6;

const SLACK: usize = 10 + 255 + 16;

pub struct PacketBuf {
    data: [u8; MAX_PACKET_LENGTH + SLACK],
    start: usize,
    end: usize,
}

impl Default for PacketBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuf {
    pub fn new() -> Self {
        Self { data: [0; MAX_PACKET_LENGTH + SLACK], start: 0, end: 0 }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True once the packet carries anything beyond the datagram header.
    pub fn has_payload(&self) -> bool {
        self.start + HEADER_LENGTH < self.end
    }

    /// Append whatever `pack` writes. Returns false (leaving the packet
    /// unchanged) when the result would cross the datagram limit.
    pub fn put(&mut self, pack: impl FnOnce(&mut Writer)) -> bool {
        let mut w = Writer::new(&mut self.data[self.end..]);
        pack(&mut w);
        let n = w.pos();
        if n != 0 && self.end + n <= MAX_PACKET_LENGTH {
            self.end += n;
            true
        } else {
            false
        }
    }

    /// Consume the next item. `None` on exhaustion or when `unpack` fails;
    /// a failed unpack consumes nothing.
    pub fn get<T>(&mut self, unpack: impl FnOnce(&mut Reader) -> Option<T>) -> Option<T> {
        if self.start == self.end {
            return None;
        }
        let mut r = Reader::new(&self.data[self.start..self.end]);
        let v = unpack(&mut r)?;
        debug_assert!(r.pos() > 0);
        self.start += r.pos();
        Some(v)
    }

    /// Decode at a caller-tracked cursor without consuming.
    pub fn peek<T>(
        &self,
        pos: &mut usize,
        unpack: impl FnOnce(&mut Reader) -> Option<T>,
    ) -> Option<T> {
        if self.start + *pos >= self.end {
            return None;
        }
        let mut r = Reader::new(&self.data[self.start + *pos..self.end]);
        let v = unpack(&mut r)?;
        *pos += r.pos();
        Some(v)
    }

    /// How many fixed-size update records still fit after one more update
    /// header.
    pub fn update_capacity(&self, record_len: usize) -> usize {
        let after_header = self.end + UPDATE_HEADER_LENGTH;
        if after_header < MAX_PACKET_LENGTH {
            (MAX_PACKET_LENGTH - after_header) / record_len
        } else {
            0
        }
    }

    /// Finished datagram bytes for transmission.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Writable backing store for a receive.
    pub fn recv_space(&mut self) -> &mut [u8] {
        &mut self.data[..MAX_PACKET_LENGTH]
    }

    /// Mark `n` received bytes as the packet's contents.
    pub fn set_received(&mut self, n: usize) {
        debug_assert!(n <= MAX_PACKET_LENGTH);
        self.start = 0;
        self.end = n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let mut p = PacketBuf::new();
        assert!(p.put(|w| w.put_u32(0xdeadbeef)));
        assert!(p.put(|w| w.put_u16(7)));
        assert_eq!(p.len(), 6);
        assert_eq!(p.get(|r| r.get_u32()), Some(0xdeadbeef));
        assert_eq!(p.get(|r| r.get_u16()), Some(7));
        assert_eq!(p.get(|r| r.get_u8()), None);
    }

    #[test]
    fn overflow_is_refused_not_fatal() {
        let mut p = PacketBuf::new();
        for _ in 0..(MAX_PACKET_LENGTH / 4) {
            assert!(p.put(|w| w.put_u32(1)));
        }
        assert_eq!(p.len(), MAX_PACKET_LENGTH);
        assert!(!p.put(|w| w.put_u8(1)));
        assert_eq!(p.len(), MAX_PACKET_LENGTH); // unchanged
    }

    #[test]
    fn oversized_single_pack_lands_in_slack() {
        let mut p = PacketBuf::new();
        // fill to just under the limit, then attempt a max-length string
        for _ in 0..((MAX_PACKET_LENGTH - 4) / 4) {
            assert!(p.put(|w| w.put_u32(0)));
        }
        let big = "x".repeat(255);
        assert!(!p.put(|w| w.put_str(&big)));
    }

    #[test]
    fn peek_does_not_consume() {
        let mut p = PacketBuf::new();
        p.put(|w| w.put_u16(42));
        let mut pos = 0;
        assert_eq!(p.peek(&mut pos, |r| r.get_u16()), Some(42));
        assert_eq!(pos, 2);
        assert_eq!(p.get(|r| r.get_u16()), Some(42));
    }

    #[test]
    fn payload_accounting() {
        let mut p = PacketBuf::new();
        p.put(|w| {
            w.put_u32(1);
            w.put_u32(2);
        });
        assert!(!p.has_payload()); // header only
        p.put(|w| w.put_u8(3));
        assert!(p.has_payload());
    }

    #[test]
    fn update_capacity_accounts_for_header() {
        let p = PacketBuf::new();
        let n = p.update_capacity(10);
        assert_eq!(n, (MAX_PACKET_LENGTH - UPDATE_HEADER_LENGTH) / 10);
        let mut p = PacketBuf::new();
        while p.len() + 4 <= MAX_PACKET_LENGTH {
            p.put(|w| w.put_u32(0));
        }
        assert_eq!(p.update_capacity(10), 0);
    }

    #[test]
    fn receive_roundtrip() {
        let mut p = PacketBuf::new();
        p.recv_space()[..3].copy_from_slice(&[9, 8, 7]);
        p.set_received(3);
        assert_eq!(p.bytes(), &[9, 8, 7]);
    }
}
