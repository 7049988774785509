use meadowlark_core_types::time::SampleRate;

use synthpod_plugin_api::HostFeatures;

/// The maximum number of `source` entries a single sink port's
/// connectable may hold (§3, §9 open question: kept as a compile-time
/// constant rather than made configurable).
pub const MAX_SOURCES_PER_SINK: usize = 32;

/// The maximum number of modules a single session may hold (§4.2, §9
/// open question: kept as a compile-time constant).
pub const MAX_MODULES: usize = 512;

/// The maximum number of DSP slave threads the parallel scheduler may
/// spawn (§4.5, §5, §9 open question: kept as a compile-time constant).
pub const MAX_SLAVES: usize = 7;

/// How many periods a `DRAIN` state is allowed to sit unacknowledged
/// before the router auto-releases back into `RUN` (§9 open question:
/// avoids a deadlock if a worker reply to a state restore is lost).
pub const DEFAULT_DRAIN_TIMEOUT_PERIODS: u32 = 4 * 48_000 / 64; // ~4s at 48kHz/64

/// Selects how the scheduler dispatches module `run` calls (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    Sequential,
    Parallel,
}

/// Configuration options accepted from the host at instantiation (§6
/// "Configuration options").
#[derive(Debug, Clone)]
pub struct Config {
    /// Sets the nominal rate; immutable for the session.
    pub sample_rate: SampleRate,
    pub min_block_size: u32,
    pub max_block_size: u32,
    /// Atom-sequence port capacity, in bytes.
    pub sequence_size: u32,
    /// Hint for latency budgeting; not otherwise interpreted by the
    /// core.
    pub num_periods: u32,
    pub features: HostFeatures,
    pub scheduling_mode: SchedulingMode,
    /// Scheduler tuning: requested RT priority for the audio thread.
    pub audio_priority: Option<u8>,
    /// Scheduler tuning: requested CPU affinity for the audio thread.
    pub cpu_affinity: Option<usize>,
    /// Scheduler tuning: number of DSP slave threads to spawn when
    /// `scheduling_mode` is `Parallel`. Clamped to `MAX_SLAVES`.
    pub num_slaves: usize,
    /// Duration, in samples, of an audio-connection ramp (§4.4: default
    /// is one period).
    pub ramp_samples: u32,
    /// How many periods a stalled `DRAIN` waits before auto-releasing.
    pub drain_timeout_periods: u32,
}

impl Default for Config {
    fn default() -> Self {
        let max_block_size = 512;
        Self {
            sample_rate: SampleRate::default(),
            min_block_size: 1,
            max_block_size,
            sequence_size: 8192,
            num_periods: 2,
            features: HostFeatures::empty(),
            scheduling_mode: SchedulingMode::Sequential,
            audio_priority: None,
            cpu_affinity: None,
            num_slaves: MAX_SLAVES,
            ramp_samples: max_block_size,
            drain_timeout_periods: DEFAULT_DRAIN_TIMEOUT_PERIODS,
        }
    }
}
