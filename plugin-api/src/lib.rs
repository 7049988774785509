pub mod atom;
pub mod catalog;
pub mod descriptor;
pub mod host;
pub mod plugin;
pub mod process;
pub mod urid;

pub use catalog::{InstantiateError, PluginCatalog};
pub use descriptor::{
    ControlPortHints, PluginDescriptor, PortBufferType, PortDescriptor, PortDirection, PortType,
    ScalePoint,
};
pub use host::{HostFeatures, HostInfo, LogLevel, PluginLog, UridMap, WorkerSchedule};
pub use plugin::{PluginAudioThread, PluginFactory, PluginMainThread, PortBufferRef};
pub use process::{AtomPortBuffer, AudioPortBuffer, ControlPortBuffer, ProcInfo, ProcessStatus};
pub use urid::Urid;
