// wire.rs — little-endian wire primitives
//
// Fixed-layout, no padding. Strings are a one-byte length followed by raw
// bytes; ids are packed as (gen, n). The writer assumes the destination slice
// is large enough (packet buffers reserve slack for the largest message); the
// reader is fully checked and returns None on truncated input.

use byteorder::{ByteOrder, LittleEndian};

use crate::id::Id;

pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    pub fn put_u16(&mut self, v: u16) {
        LittleEndian::write_u16(&mut self.buf[self.pos..self.pos + 2], v);
        self.pos += 2;
    }

    pub fn put_u32(&mut self, v: u32) {
        LittleEndian::write_u32(&mut self.buf[self.pos..self.pos + 4], v);
        self.pos += 4;
    }

    pub fn put_i16(&mut self, v: i16) {
        self.put_u16(v as u16);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put_u32(v as u32);
    }

    pub fn put_id(&mut self, id: Id) {
        self.put_u16(id.gen);
        self.put_u16(id.n);
    }

    /// Length byte followed by raw bytes. Longer strings are truncated at 255.
    pub fn put_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(u8::MAX as usize);
        self.put_u8(n as u8);
        self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += n;
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn get_u8(&mut self) -> Option<u8> {
        let v = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    pub fn get_u16(&mut self) -> Option<u16> {
        let end = self.pos.checked_add(2)?;
        let v = LittleEndian::read_u16(self.buf.get(self.pos..end)?);
        self.pos = end;
        Some(v)
    }

    pub fn get_u32(&mut self) -> Option<u32> {
        let end = self.pos.checked_add(4)?;
        let v = LittleEndian::read_u32(self.buf.get(self.pos..end)?);
        self.pos = end;
        Some(v)
    }

    pub fn get_i16(&mut self) -> Option<i16> {
        self.get_u16().map(|v| v as i16)
    }

    pub fn get_i32(&mut self) -> Option<i32> {
        self.get_u32().map(|v| v as i32)
    }

    pub fn get_id(&mut self) -> Option<Id> {
        let gen = self.get_u16()?;
        let n = self.get_u16()?;
        Some(Id { gen, n })
    }

    /// Strings are duplicated into owned storage; invalid UTF-8 is replaced.
    pub fn get_str(&mut self) -> Option<String> {
        let n = self.get_u8()? as usize;
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}
