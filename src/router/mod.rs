//! C7: the event router / patcher. Owns the three SPSC rings (UI↔app,
//! worker↔app, feedback) plus the app→worker and trace rings, and
//! drives the stall state machine (§4.7).

pub mod patch;
pub mod ring;
pub mod stall;

use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use synthpod_plugin_api::atom::AtomHeader;

use crate::registry::Registry;
use ring::{framed_ring, RingReader, RingWriter};
use patch::PatchObject;
use stall::{StallMachine, StallState};

/// Sequence number carried on every major state update so the UI can
/// detect a gap and requery full state (§4.7 "Stall").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(pub u64);

/// The opposite ends of the UI↔app rings, held by whatever UI peer
/// sits across the ring boundary (§3 "One or more UI peers").
pub struct UiHandle {
    pub to_app: RingWriter,
    pub from_app: RingReader,
}

/// The opposite ends of the worker↔app rings, held by the worker
/// bridge (C8).
pub struct WorkerHandle {
    pub to_app: RingWriter,
    pub from_app: RingReader,
    pub trace_reader: RingReader,
}

/// Owns every ring the app core exchanges atoms over.
pub struct Router {
    ui_to_app: RingReader,
    app_to_ui: RingWriter,
    worker_to_app: RingReader,
    /// Shared so each module's `RingWorkerSchedule` handle can frame a
    /// request directly, under the same single-retry try-lock
    /// discipline as the control-port stash (§9 "Locks on the audio
    /// thread").
    app_to_worker: Arc<AtomicRefCell<RingWriter>>,
    feedback_writer: RingWriter,
    feedback_reader: RingReader,
    trace: RingWriter,
    stall: StallMachine,
    sequence: SequenceNumber,
}

/// What a caller gets back after the router has dispatched one
/// incoming message from a ring.
pub enum RoutedMessage {
    /// Targeted at the host itself (consumed here).
    ForHost(PatchObject),
    /// Targeted at a plugin port; forward into that port's incoming
    /// atom sequence.
    ForPlugin {
        module: Urid,
        symbol: String,
        object: PatchObject,
    },
}

use synthpod_plugin_api::Urid;

impl Router {
    /// Builds the router plus the paired handles its two peers use.
    /// The UI and worker sides are callers in the same process
    /// (possibly across an `rtrb` memory region shared with a separate
    /// process in a full deployment; that mapping is outside this
    /// crate's scope, see spec §1).
    pub fn new(ring_capacity: usize, drain_timeout_periods: u32) -> (Self, UiHandle, WorkerHandle) {
        let (ui_to_app_writer, ui_to_app) = framed_ring(ring_capacity);
        let (app_to_ui, app_to_ui_reader) = framed_ring(ring_capacity);
        let (app_to_worker, app_to_worker_reader) = framed_ring(ring_capacity);
        let (worker_to_app_writer, worker_to_app) = framed_ring(ring_capacity);
        let (feedback_writer, feedback_reader) = framed_ring(ring_capacity);
        let (trace, trace_reader) = framed_ring(4096);

        let router = Self {
            ui_to_app,
            app_to_ui,
            worker_to_app,
            app_to_worker: Arc::new(AtomicRefCell::new(app_to_worker)),
            feedback_writer,
            feedback_reader,
            trace,
            stall: StallMachine::new(drain_timeout_periods),
            sequence: SequenceNumber::default(),
        };
        let ui = UiHandle {
            to_app: ui_to_app_writer,
            from_app: app_to_ui_reader,
        };
        let worker = WorkerHandle {
            to_app: worker_to_app_writer,
            from_app: app_to_worker_reader,
            trace_reader,
        };
        (router, ui, worker)
    }

    pub fn stall_state(&self) -> StallState {
        self.stall.state()
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Writes one already-encoded atom into the app→UI ring, stamping
    /// nothing further: the sequence number is part of the message's
    /// own properties, set by the caller before encoding.
    pub fn to_ui_send(&mut self, frame: &[u8]) -> bool {
        let ok = self.app_to_ui.write_frame(frame);
        if !ok {
            self.trace_stall("to_ui ring full");
        }
        ok
    }

    pub fn to_worker_send(&mut self, frame: &[u8]) -> bool {
        let ok = self
            .app_to_worker
            .try_borrow_mut()
            .map(|mut w| w.write_frame(frame))
            .unwrap_or(false);
        if !ok {
            self.trace_stall("to_worker ring full");
        }
        ok
    }

    /// Hands out a clone of the shared app→worker writer for a newly
    /// instantiated module's `RingWorkerSchedule` feature handle.
    pub fn app_to_worker_handle(&self) -> Arc<AtomicRefCell<RingWriter>> {
        self.app_to_worker.clone()
    }

    pub fn feedback_send(&mut self, frame: &[u8]) -> bool {
        let ok = self.feedback_writer.write_frame(frame);
        if !ok {
            self.trace_stall("feedback ring full");
        }
        ok
    }

    /// Drains the app's own feedback loopback ring (§3 "a feedback
    /// ring app→app").
    pub fn poll_feedback(&mut self, registry: &Registry, self_module_uri: &str) -> Vec<RoutedMessage> {
        drain_ring(&mut self.feedback_reader, registry, self_module_uri)
    }

    fn trace_stall(&mut self, message: &str) {
        let mut frame = vec![0u8; AtomHeader::SIZE + message.len()];
        AtomHeader {
            size: message.len() as u32,
            atom_type: Urid::NONE,
        }
        .write(&mut frame);
        frame[AtomHeader::SIZE..].copy_from_slice(message.as_bytes());
        // The trace ring is sized generously and is log-only; if it is
        // also full the message is simply lost, per §4.7 "the core
        // never blocks".
        let _ = self.trace.write_frame(&frame);
    }

    /// Drains every complete atom currently in the UI ring, decoding
    /// and classifying each as host-bound or plugin-bound (§4.7 "All
    /// patch objects reaching the audio thread are filtered").
    ///
    /// Returns nothing while `stall_state().advance_ui()` is false
    /// (§8 invariant 8: no UI message is consumed during DRAIN/WAIT).
    pub fn poll_from_ui(&mut self, registry: &Registry, self_module_uri: &str) -> Vec<RoutedMessage> {
        if !self.stall.state().advance_ui() {
            return Vec::new();
        }
        drain_ring(&mut self.ui_to_app, registry, self_module_uri)
    }

    pub fn poll_from_worker(&mut self, registry: &Registry, self_module_uri: &str) -> Vec<RoutedMessage> {
        drain_ring(&mut self.worker_to_app, registry, self_module_uri)
    }

    pub fn begin_drain(&mut self) {
        self.stall.begin_drain();
    }

    pub fn drain_acknowledged(&mut self) {
        self.stall.drain_acknowledged();
    }

    pub fn state_posted(&mut self) {
        self.stall.state_posted();
    }

    pub fn desilenced(&mut self) {
        self.stall.desilenced();
    }

    pub fn tick_period(&mut self) {
        self.stall.tick();
        self.sequence.0 += 1;
    }
}

fn drain_ring(reader: &mut RingReader, registry: &Registry, self_module_uri: &str) -> Vec<RoutedMessage> {
    let mut out = Vec::new();
    loop {
        let mut header_bytes = [0u8; AtomHeader::SIZE];
        let n = reader.read_exact(&mut header_bytes);
        if n < AtomHeader::SIZE {
            break;
        }
        let header = match AtomHeader::read(&header_bytes) {
            Some(h) => h,
            None => break,
        };
        let padded_body = synthpod_plugin_api::atom::pad_size(header.size as usize);
        let mut body = vec![0u8; padded_body];
        let read = reader.read_exact(&mut body);
        if read < padded_body {
            break;
        }

        let mut frame = Vec::with_capacity(AtomHeader::SIZE + padded_body);
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(&body);

        if let Some(obj) = PatchObject::decode(registry, &frame) {
            let targets_host = obj
                .get(registry.well_known.module_index)
                .map(|v| matches!(v, patch::Value::String(s) if s == self_module_uri))
                .unwrap_or(true);

            if targets_host {
                out.push(RoutedMessage::ForHost(obj));
            } else if let Some(patch::Value::Urid(module)) = obj.get(registry.well_known.module_index) {
                let symbol = obj
                    .get(registry.well_known.port_index)
                    .map(|v| format!("{:?}", v))
                    .unwrap_or_default();
                out.push(RoutedMessage::ForPlugin {
                    module: *module,
                    symbol,
                    object: obj,
                });
            }
        }
    }
    out
}
