use std::error::Error;
use std::sync::Arc;

use basedrop::Shared;

use crate::descriptor::PluginDescriptor;
use crate::host::{HostFeatures, HostInfo, PluginLog, WorkerSchedule};
use crate::process::{ProcInfo, ProcessStatus};

/// One port buffer as connected for a `process()` call. The catalog's
/// port descriptors determine which variant a given index will always
/// be; plugins are expected to match on `direction`/`port_type` at
/// `activate` time, not per period.
pub enum PortBufferRef<'a> {
    Control(&'a mut f32),
    Audio(&'a mut [f32]),
    Atom(&'a mut [u8]),
}

/// The methods of a plugin class used to create new instances.
///
/// `[main-thread]`, called once per class (not per instance) to describe
/// it, then once per `add()` request to build an instance.
pub trait PluginFactory: Send {
    fn descriptor(&self) -> PluginDescriptor;

    /// Create a new instance of this plugin.
    ///
    /// `[worker-thread]`
    fn new(
        &mut self,
        host_info: Shared<HostInfo>,
        features: HostFeatures,
        log: Arc<dyn PluginLog>,
        coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginMainThread>, Box<dyn Error>>;
}

/// The methods of a plugin instance which run on the worker thread.
pub trait PluginMainThread: Send {
    /// Activate the plugin and return its audio-thread counterpart.
    ///
    /// Once activated, port configuration and latency must remain
    /// constant until `deactivate`.
    ///
    /// `[worker-thread & !active]`
    fn activate(
        &mut self,
        sample_rate: f64,
        min_frames: u32,
        max_frames: u32,
        worker: Arc<dyn WorkerSchedule>,
        coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginAudioThread>, Box<dyn Error>>;

    /// `[worker-thread & active]`
    fn deactivate(&mut self);

    /// Handle a background job previously requested by this plugin's
    /// audio-thread counterpart via `WorkerSchedule::schedule_work`.
    ///
    /// By default this does nothing.
    ///
    /// `[worker-thread]`
    #[allow(unused_variables)]
    fn work(&mut self, payload: &[u8]) {}

    /// Produce this plugin's current state as a sequence of typed
    /// key/value entries, for the host's state-serializer collaborator
    /// to persist (§1 "State serialization" — the on-disk encoding is
    /// opaque to this crate; only the in-memory entries are ours).
    ///
    /// By default a plugin has no private state beyond its port values.
    ///
    /// `[worker-thread]`
    fn save_state(&self) -> Vec<(String, Vec<u8>)> {
        Vec::new()
    }

    /// Restore state previously produced by `save_state`.
    ///
    /// `[worker-thread]`
    #[allow(unused_variables)]
    fn restore_state(&mut self, entries: &[(String, Vec<u8>)]) {}
}

/// The methods of a plugin instance which run on the audio thread.
pub trait PluginAudioThread: Send + 'static {
    /// Process one period's worth of audio/events.
    ///
    /// `ports` is indexed exactly as the catalog's port descriptors for
    /// this plugin class; the host guarantees both the length and the
    /// per-index variant never change between activation and
    /// deactivation.
    ///
    /// `[audio-thread & active]`
    fn process(&mut self, info: &ProcInfo, ports: &mut [PortBufferRef<'_>]) -> ProcessStatus;
}
