use std::fmt;

use synthpod_plugin_api::InstantiateError;

/// Errors the module manager can report back to the UI as a `patch:Error`
/// (§7 "Capacity" / "Unsupported plugin" / "Instantiation failed").
#[derive(Debug, Clone)]
pub enum ModuleAddError {
    /// The module vector is already at `MAX_MODULES` capacity.
    Capacity,
    /// The catalog does not recognize the requested uri.
    Unsupported(String),
    /// The catalog recognized the uri but instantiation failed.
    Instantiate(InstantiateError),
}

impl fmt::Display for ModuleAddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleAddError::Capacity => {
                write!(f, "module capacity reached, cannot add another module")
            }
            ModuleAddError::Unsupported(uri) => write!(f, "plugin {} is not supported", uri),
            ModuleAddError::Instantiate(e) => write!(f, "failed to instantiate plugin: {}", e),
        }
    }
}

impl std::error::Error for ModuleAddError {}

/// Errors `Connector::connect` can report (§4.4, §8 invariant 1/5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Source is not an output port, or sink is not an input port.
    DirectionMismatch,
    /// Source and sink port types differ (control/audio/cv/atom).
    TypeMismatch,
    /// The sink's connectable already holds `MAX_SOURCES_PER_SINK`
    /// entries.
    Capacity,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::DirectionMismatch => {
                write!(f, "source must be an output port and sink an input port")
            }
            ConnectError::TypeMismatch => write!(f, "source and sink port types do not match"),
            ConnectError::Capacity => {
                write!(f, "sink already has the maximum number of sources connected")
            }
        }
    }
}

impl std::error::Error for ConnectError {}
