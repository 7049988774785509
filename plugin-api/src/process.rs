/// Per-period information handed to `PluginAudioThread::process`.
#[derive(Debug, Clone, Copy)]
pub struct ProcInfo {
    /// Number of sample frames to process this period.
    pub frames: u32,
    /// Monotonically increasing period counter, useful for plugins that
    /// need to detect discontinuities.
    pub period_counter: u64,
}

/// The outcome of a single `process()` call. Unlike the teacher's
/// sleep/tail-aware status (irrelevant here — the spec's plugins always
/// run every period they're scheduled), this only distinguishes success
/// from a hard failure so the scheduler can short-circuit output
/// clearing for a broken plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    Error,
}

/// A plugin-owned, host-allocated control port buffer: a single `f32`.
pub type ControlPortBuffer<'a> = &'a mut f32;

/// A plugin-owned, host-allocated audio or CV port buffer: `frames`
/// contiguous, 8-byte-aligned samples.
pub type AudioPortBuffer<'a> = &'a mut [f32];

/// A plugin-owned, host-allocated atom-sequence port buffer: raw bytes in
/// the `atom:Sequence` wire format (see `crate::atom`).
pub type AtomPortBuffer<'a> = &'a mut [u8];
