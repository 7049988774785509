use meadowlark_core_types::time::SampleRate;

use crate::urid::Urid;

/// Static information about the host, handed to every plugin instance at
/// construction time and never changed for the life of the session.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub name: String,
    pub sample_rate: SampleRate,
    pub min_block_size: u32,
    pub max_block_size: u32,
}

bitflags::bitflags! {
    /// Feature flags propagated to plugins at instantiation (§6
    /// "Configuration options" / "features flags").
    #[derive(Default)]
    pub struct HostFeatures: u32 {
        /// The host will always call `run` with exactly `max_block_size`
        /// frames (except possibly a final short period).
        const FIXED_BLOCK_LENGTH = 0b0000_0001;
        /// The host will always call `run` with a power-of-two frame
        /// count.
        const POWER_OF_2_BLOCK_LENGTH = 0b0000_0010;
    }
}

/// Severity of a log message raised by a plugin through its `PluginLog`
/// feature handle, mirroring the original's `log:Entry/Error/Note/Trace/
/// Warning` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Entry,
    Note,
    Warning,
    Error,
    /// Trace-level messages are the only ones a plugin may legally emit
    /// from its audio-thread `run()`; the host must never block or
    /// allocate servicing one.
    Trace,
}

/// The callback surface a plugin instance is given to talk back to the
/// host: logging, and scheduling background work on the worker thread.
///
/// Implemented by `synthpod-core`; plugins only ever see this trait
/// object, never the concrete type, so the core stays free to change its
/// internals.
pub trait PluginLog: Send + Sync {
    /// `[main-thread or audio-thread]` — audio-thread callers must only
    /// ever use `LogLevel::Trace`.
    fn log(&self, level: LogLevel, message: &str);
}

/// A plugin-private handle for requesting non-realtime work from inside
/// `PluginAudioThread::process`. The request is framed onto the
/// app→worker ring tagged with the requesting module, mirroring the
/// original's `LV2_Worker_Schedule` feature.
pub trait WorkerSchedule: Send + Sync {
    /// `[audio-thread]` Request that `payload` be delivered to this
    /// plugin's `PluginMainThread::work` on the worker thread. Returns
    /// `false` if the app→worker ring was full (the core never blocks).
    fn schedule_work(&self, payload: &[u8]) -> bool;
}

/// Maps and unmaps URIs to/from the process-stable small integers used
/// everywhere else in the host (registry, C1).
pub trait UridMap: Send + Sync {
    fn map(&self, uri: &str) -> Urid;
    fn unmap(&self, urid: Urid) -> Option<String>;
}
