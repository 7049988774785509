//! The physical atom wire format shared by every port buffer and every
//! ring-buffer message in the host.
//!
//! An atom is a `{size: u32, type: u32}` header followed by `size` bytes
//! of body, the whole thing padded so the next atom starts on an 8-byte
//! boundary. This module only knows about the byte layout; the meaning
//! of a given `type` urid (is it `Int`? `Object`? a patch verb?) is owned
//! by the registry and the `patch` layer in `synthpod-core`.

use crate::urid::Urid;
use std::mem::size_of;

/// Every atom is padded so the next atom begins 8-byte aligned.
pub const ATOM_ALIGN: usize = 8;

#[inline]
pub const fn pad_size(size: usize) -> usize {
    (size + (ATOM_ALIGN - 1)) & !(ATOM_ALIGN - 1)
}

/// The `{size, type}` header present at the start of every atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct AtomHeader {
    pub size: u32,
    pub atom_type: Urid,
}

impl AtomHeader {
    pub const SIZE: usize = size_of::<u32>() * 2;

    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let size = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let atom_type = Urid::from_raw(u32::from_ne_bytes(buf[4..8].try_into().unwrap()));
        Some(Self { size, atom_type })
    }

    pub fn write(self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.size.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.atom_type.get().to_ne_bytes());
    }

    /// Total padded size of this atom (header + padded body).
    pub fn padded_total(self) -> usize {
        Self::SIZE + pad_size(self.size as usize)
    }
}

/// The body header of an `atom:Sequence`: `{unit, pad}` followed by a run
/// of `{frames: i64, body: Atom}` events (a frame-time sequence; the
/// beat-time variant is not used by this host).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SequenceBody {
    pub unit: Urid,
    pub pad: u32,
}

impl SequenceBody {
    pub const SIZE: usize = size_of::<u32>() * 2;

    pub fn write(self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.unit.get().to_ne_bytes());
        buf[4..8].copy_from_slice(&self.pad.to_ne_bytes());
    }

    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let unit = Urid::from_raw(u32::from_ne_bytes(buf[0..4].try_into().unwrap()));
        let pad = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
        Some(Self { unit, pad })
    }
}

/// One event inside an atom sequence: a frame-accurate timestamp and an
/// embedded atom body.
#[derive(Debug, Clone, Copy)]
pub struct SequenceEventHeader {
    pub frames: i64,
}

impl SequenceEventHeader {
    pub const SIZE: usize = size_of::<i64>();

    pub fn write(self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.frames.to_ne_bytes());
    }

    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { frames: i64::from_ne_bytes(buf[0..8].try_into().unwrap()) })
    }
}

/// Initializes a byte buffer as an empty `atom:Sequence`, the state every
/// freshly-allocated atom-sequence port buffer must start in.
///
/// `capacity` is the total size of `buf` that belongs to this atom
/// (header included). For an input port the body size is set to just the
/// sequence-body header (8 bytes, no events); for an output port it is
/// set to the full remaining capacity so a plugin knows how much room it
/// has to write into.
pub fn init_sequence(buf: &mut [u8], capacity: usize, is_output: bool, sequence_urid: Urid) {
    assert!(capacity >= AtomHeader::SIZE + SequenceBody::SIZE, "atom sequence buffer too small");
    buf[..capacity].fill(0);

    let body_size = if is_output {
        (capacity - AtomHeader::SIZE) as u32
    } else {
        SequenceBody::SIZE as u32
    };

    AtomHeader { size: body_size, atom_type: sequence_urid }.write(buf);
    SequenceBody { unit: Urid::NONE, pad: 0 }.write(&mut buf[AtomHeader::SIZE..]);
}

/// Read-only view over an `atom:Sequence` buffer, yielding `(frames,
/// body_header, body_bytes)` for each event in store order.
pub struct SequenceReader<'a> {
    body: &'a [u8],
    offset: usize,
}

impl<'a> SequenceReader<'a> {
    /// `buf` must start at the `LV2_Atom` header of the sequence.
    pub fn new(buf: &'a [u8]) -> Option<Self> {
        let header = AtomHeader::read(buf)?;
        let body_len = header.size as usize;
        let body = &buf[AtomHeader::SIZE..AtomHeader::SIZE + body_len];
        // Skip the {unit, pad} sequence-body header; iteration starts at
        // the first event (if any).
        Some(Self { body, offset: SequenceBody::SIZE.min(body.len()) })
    }
}

impl<'a> Iterator for SequenceReader<'a> {
    /// `(frame time, atom type, atom body bytes)`
    type Item = (i64, Urid, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + SequenceEventHeader::SIZE + AtomHeader::SIZE > self.body.len() {
            return None;
        }
        let ev = SequenceEventHeader::read(&self.body[self.offset..])?;
        let atom_off = self.offset + SequenceEventHeader::SIZE;
        let header = AtomHeader::read(&self.body[atom_off..])?;
        let body_off = atom_off + AtomHeader::SIZE;
        let body_end = body_off + header.size as usize;
        if body_end > self.body.len() {
            return None;
        }
        let body = &self.body[body_off..body_end];

        let advance = SequenceEventHeader::SIZE + header.padded_total();
        self.offset += advance;

        Some((ev.frames, header.atom_type, body))
    }
}

/// Appends events into an `atom:Sequence` buffer in-place, tracking
/// remaining capacity the way an atom-forge would. Used by the
/// multiplexer to merge source sequences into a sink buffer and by the
/// event router to frame outgoing patch messages.
pub struct SequenceWriter<'a> {
    buf: &'a mut [u8],
    capacity: usize,
    write_offset: usize,
    sequence_urid: Urid,
    /// Number of events dropped because the buffer ran out of room.
    pub overflow_count: u64,
}

impl<'a> SequenceWriter<'a> {
    /// Begins a fresh (empty) sequence over `buf`, whose total length is
    /// `buf.len()`.
    pub fn new(buf: &'a mut [u8], sequence_urid: Urid) -> Self {
        let capacity = buf.len();
        let write_offset = AtomHeader::SIZE + SequenceBody::SIZE;
        AtomHeader { size: (capacity - AtomHeader::SIZE) as u32, atom_type: sequence_urid }
            .write(buf);
        SequenceBody { unit: Urid::NONE, pad: 0 }.write(&mut buf[AtomHeader::SIZE..]);
        Self { buf, capacity, write_offset, sequence_urid, overflow_count: 0 }
    }

    /// Appends one event. Returns `false` (and increments
    /// `overflow_count`) if there isn't room, leaving the sequence valid
    /// but short of this event — per spec, a non-fatal drop.
    pub fn push_event(&mut self, frames: i64, atom_type: Urid, body: &[u8]) -> bool {
        let needed = SequenceEventHeader::SIZE + AtomHeader::SIZE + pad_size(body.len());
        if self.write_offset + needed > self.capacity {
            self.overflow_count += 1;
            return false;
        }

        SequenceEventHeader { frames }.write(&mut self.buf[self.write_offset..]);
        let atom_off = self.write_offset + SequenceEventHeader::SIZE;
        AtomHeader { size: body.len() as u32, atom_type }.write(&mut self.buf[atom_off..]);
        let body_off = atom_off + AtomHeader::SIZE;
        self.buf[body_off..body_off + body.len()].copy_from_slice(body);

        self.write_offset += needed;
        self.finalize_header();
        true
    }

    fn finalize_header(&mut self) {
        let body_size = (self.write_offset - AtomHeader::SIZE) as u32;
        AtomHeader { size: body_size, atom_type: self.sequence_urid }.write(self.buf);
    }
}
