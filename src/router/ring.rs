//! The lock-free SPSC byte ring a framed atom is written into, built on
//! `rtrb` the way the rest of the corpus uses it for realtime-safe
//! message passing (§3 "Event buffers", §4.7 "to_ui_request/advance").
//!
//! Framing is push/pop at the byte level rather than rtrb's chunk API:
//! every push and pop is a single atomic index bump, so this stays
//! allocation-free and lock-free on the audio thread while keeping the
//! wire format exactly the atoms `synthpod_plugin_api::atom` already
//! knows how to read and write.

use rtrb::{Consumer, Producer, RingBuffer};

/// Producer side of one framed-atom ring.
pub struct RingWriter {
    producer: Producer<u8>,
    /// Incremented every time a write is dropped because the ring did
    /// not have room for the whole frame (§4.7 "Stall": the core never
    /// blocks, it traces and drops).
    pub stall_count: u64,
}

// `Producer<u8>` is `Send` but not `Sync` (rtrb is SPSC). `RingWriter` is
// only ever reached through `Arc<AtomicRefCell<RingWriter>>`, which already
// serializes all mutable access via `try_borrow_mut`, so concurrent access
// from multiple threads can never produce more than one live `&mut`.
unsafe impl Sync for RingWriter {}

impl RingWriter {
    /// Writes `frame` atomically: either every byte fits or nothing is
    /// written and `stall_count` is incremented. `frame` is expected to
    /// already be one padded atom (header + body), matching
    /// `AtomHeader::padded_total`.
    pub fn write_frame(&mut self, frame: &[u8]) -> bool {
        if self.producer.slots() < frame.len() {
            self.stall_count += 1;
            return false;
        }
        for &byte in frame {
            // Capacity was checked above; this cannot fail.
            let _ = self.producer.push(byte);
        }
        true
    }

    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

/// Consumer side of one framed-atom ring.
pub struct RingReader {
    consumer: Consumer<u8>,
}

impl RingReader {
    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }

    /// Reads the next atom header (8 bytes) without consuming the ring,
    /// by popping into `scratch` and handing back how many bytes were
    /// actually available; returns `0` if the ring is empty. Callers
    /// that need to re-examine bytes already popped keep them in
    /// `scratch` themselves — rtrb offers no true peek across more than
    /// one byte, so framing is "pop the header, then pop exactly
    /// `size` more bytes" rather than peek-then-advance.
    pub fn read_exact(&mut self, scratch: &mut [u8]) -> usize {
        let mut n = 0;
        for slot in scratch.iter_mut() {
            match self.consumer.pop() {
                Ok(byte) => {
                    *slot = byte;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        n
    }

    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

/// Builds one SPSC framed ring of `capacity` bytes.
pub fn framed_ring(capacity: usize) -> (RingWriter, RingReader) {
    let (producer, consumer) = RingBuffer::<u8>::new(capacity);
    (
        RingWriter {
            producer,
            stall_count: 0,
        },
        RingReader { consumer },
    )
}
