//! C3: per-port buffers, ranges/hints, and the connectable list a sink
//! port uses to track its sources and their ramp state, grounded on
//! `original_source/lib/synthpod_private.h`'s `port_t`/`source_t` and
//! spec §3/§4.3/§4.6.

use smallvec::SmallVec;

use synthpod_plugin_api::{ControlPortHints, PortDirection, PortType, Urid};

use crate::config::MAX_SOURCES_PER_SINK;
use crate::module::ModuleId;

/// Index of a port within its owning module's port vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortIndex(pub u32);

/// Addresses a port by (module, index) rather than by pointer (§9
/// "Cyclic and shared structure").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortAddr {
    pub module: ModuleId,
    pub index: PortIndex,
}

/// State machine driving a single source's contribution to an audio
/// sink's accumulation (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampState {
    /// Fully connected; contribute at unit gain.
    None,
    /// Fading in from 0 to 1 after a fresh `connect`.
    Up,
    /// Fading out from 1 to 0 after a `disconnect`; on completion the
    /// entry is removed.
    Down,
    /// Like `Down`, but on completion the *source* module's
    /// `delete_request` is set (two-phase module deletion).
    DownDel,
    /// Like `Down`, but used while a preset/bundle restore is in
    /// flight; on completion the global silence state advances instead
    /// of removing the entry outright.
    DownDrain,
    /// Like `Down`, but on completion the source module's `disabled`
    /// flag is set instead of removing the entry (module bypass).
    DownDisable,
}

impl RampState {
    pub fn is_down_variant(self) -> bool {
        !matches!(self, RampState::None | RampState::Up)
    }
}

/// One entry in a sink's connectable: a source port plus its ramp.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    pub port: PortAddr,
    pub ramp: RampState,
    /// Samples remaining until the ramp reaches its terminal value.
    pub remaining: u32,
    /// Current scalar contribution, in `[0, 1]`.
    pub scalar: f32,
}

impl Source {
    fn connected(port: PortAddr) -> Self {
        Self {
            port,
            ramp: RampState::None,
            remaining: 0,
            scalar: 1.0,
        }
    }

    /// Advances the ramp by `nsamples`. Returns the terminal scalar
    /// value to use for this block's last sample, for ramp-completion
    /// bookkeeping by the caller.
    pub fn advance(&mut self, nsamples: u32, ramp_samples: u32) {
        match self.ramp {
            RampState::None => {}
            RampState::Up => {
                self.remaining = self.remaining.saturating_sub(nsamples);
                let done = ramp_samples.saturating_sub(self.remaining);
                self.scalar = (done as f32 / ramp_samples as f32).min(1.0);
                if self.remaining == 0 {
                    self.ramp = RampState::None;
                    self.scalar = 1.0;
                }
            }
            RampState::Down | RampState::DownDel | RampState::DownDrain | RampState::DownDisable => {
                self.remaining = self.remaining.saturating_sub(nsamples);
                let done = ramp_samples.saturating_sub(self.remaining);
                self.scalar = (1.0 - done as f32 / ramp_samples as f32).max(0.0);
            }
        }
    }

    pub fn ramp_complete(&self) -> bool {
        self.ramp.is_down_variant() && self.remaining == 0
    }
}

/// A counted list of up to `MAX_SOURCES_PER_SINK` sources feeding one
/// sink port (§3 "A connectable").
#[derive(Debug, Clone, Default)]
pub struct Connectable {
    sources: SmallVec<[Source; MAX_SOURCES_PER_SINK]>,
}

impl Connectable {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sources.len() >= MAX_SOURCES_PER_SINK
    }

    pub fn contains(&self, port: PortAddr) -> bool {
        self.sources.iter().any(|s| s.port == port)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Source> {
        self.sources.iter_mut()
    }

    /// Appends `port` as a plain (non-ramped) connection. Used for CV,
    /// control, and atom sinks, which connect/disconnect atomically.
    pub fn push_plain(&mut self, port: PortAddr) -> bool {
        if self.is_full() || self.contains(port) {
            return false;
        }
        self.sources.push(Source::connected(port));
        true
    }

    /// Appends `port` with an initial `Up` ramp (audio sinks only).
    pub fn push_ramped_up(&mut self, port: PortAddr, ramp_samples: u32) -> bool {
        if self.is_full() || self.contains(port) {
            return false;
        }
        self.sources.push(Source {
            port,
            ramp: RampState::Up,
            remaining: ramp_samples,
            scalar: 0.0,
        });
        true
    }

    /// Removes `port` immediately (no ramp). Returns whether it was
    /// present.
    pub fn remove_plain(&mut self, port: PortAddr) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.port != port);
        self.sources.len() != before
    }

    /// Begins a ramp-down for `port` with the given terminal state.
    /// Returns `false` if `port` was not connected or is already
    /// ramping down.
    pub fn begin_ramp_down(&mut self, port: PortAddr, ramp_samples: u32, terminal: RampState) -> bool {
        debug_assert!(terminal.is_down_variant());
        for s in self.sources.iter_mut() {
            if s.port == port && !s.ramp.is_down_variant() {
                s.ramp = terminal;
                s.remaining = ramp_samples;
                return true;
            }
        }
        false
    }

    /// Drops every source whose ramp has reached its terminal value,
    /// invoking `on_complete` for each with its terminal ramp state.
    /// `DownDisable` is the one terminal state that does not drop the
    /// entry: a disabled module's ports stay connected (§4.2 `disable`),
    /// only its `run` is skipped, so the faded-to-silence source is left
    /// in place for `App::set_disabled` to fade back in on re-enable.
    pub fn drain_completed_ramps(&mut self, mut on_complete: impl FnMut(PortAddr, RampState)) {
        let mut i = 0;
        while i < self.sources.len() {
            if self.sources[i].ramp_complete() {
                if self.sources[i].ramp == RampState::DownDisable {
                    on_complete(self.sources[i].port, RampState::DownDisable);
                    i += 1;
                } else {
                    let s = self.sources.remove(i);
                    on_complete(s.port, s.ramp);
                }
            } else {
                i += 1;
            }
        }
    }
}

/// Control-port specific metadata (§3 "control").
#[derive(Debug, Clone)]
pub struct ControlPort {
    pub hints: ControlPortHints,
    /// Canonical value, written by the audio thread only.
    pub value: f32,
    /// Last value sent to the UI via transfer notification.
    pub last_sent: f32,
    /// Stash written by the UI path; the audio thread try-locks `lock`
    /// to copy it into `value` (§3 "a stash float, atomic lock flag").
    pub stash: f32,
    pub lock: atomic_refcell::AtomicRefCell<()>,
    pub stashing: bool,
}

impl ControlPort {
    pub fn new(hints: ControlPortHints) -> Self {
        let value = hints.default;
        Self {
            hints,
            value,
            last_sent: value,
            stash: value,
            lock: atomic_refcell::AtomicRefCell::new(()),
            stashing: false,
        }
    }

    /// UI-side write: unconditional, never contends with the audio
    /// thread for more than a pointer store (§5 "Control-port stash").
    pub fn write_from_ui(&mut self, value: f32) {
        self.stash = value;
        self.stashing = true;
    }

    /// Audio-side try-lock pull: copies `stash` into `value` if the UI
    /// is not mid-write; never blocks.
    pub fn try_pull_stash(&mut self) {
        if !self.stashing {
            return;
        }
        if let Ok(_guard) = self.lock.try_borrow_mut() {
            self.value = self.stash;
            self.stashing = false;
        }
    }
}

/// Per-port-type payload (§3 "type-specific union").
#[derive(Debug, Clone)]
pub enum PortPayload {
    Control(ControlPort),
    Audio {
        buffer: Vec<f32>,
        last_peak: f32,
        connectable: Connectable,
    },
    Cv {
        buffer: Vec<f32>,
        last_peak: f32,
        connectable: Connectable,
    },
    Atom {
        buffer: Vec<u8>,
        patchable: bool,
        connectable: Connectable,
        overflow_count: u64,
    },
}

/// A single port: the declared metadata plus its live buffer (§3, §4.3).
#[derive(Debug, Clone)]
pub struct Port {
    pub symbol: String,
    pub name: String,
    pub direction: PortDirection,
    pub port_type: PortType,
    pub protocol: Urid,
    pub subscriptions: u32,
    pub payload: PortPayload,
}

impl Port {
    pub fn is_input(&self) -> bool {
        matches!(self.direction, PortDirection::Input)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.direction, PortDirection::Output)
    }

    pub fn connectable(&self) -> Option<&Connectable> {
        match &self.payload {
            PortPayload::Audio { connectable, .. }
            | PortPayload::Cv { connectable, .. }
            | PortPayload::Atom { connectable, .. } => Some(connectable),
            PortPayload::Control(_) => None,
        }
    }

    pub fn connectable_mut(&mut self) -> Option<&mut Connectable> {
        match &mut self.payload {
            PortPayload::Audio { connectable, .. }
            | PortPayload::Cv { connectable, .. }
            | PortPayload::Atom { connectable, .. } => Some(connectable),
            PortPayload::Control(_) => None,
        }
    }
}
