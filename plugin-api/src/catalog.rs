use std::fmt;
use std::sync::Arc;

use basedrop::Shared;

use crate::descriptor::PortDescriptor;
use crate::host::{HostFeatures, HostInfo, PluginLog};
use crate::plugin::PluginMainThread;

/// The interface the app core drives a plugin catalog through. Plugin
/// discovery, RDF metadata lookup, and the on-disk/library-loading
/// details of how a URI becomes a running instance are entirely the
/// catalog's concern (§1 "Out of scope"); the core only ever asks these
/// four questions.
pub trait PluginCatalog: Send + Sync {
    /// `is_supported(uri) -> bool`
    fn is_supported(&self, uri: &str) -> bool;

    /// Number of ports the plugin class at `uri` declares, or `None` if
    /// `uri` is not instantiable.
    fn port_count(&self, uri: &str) -> Option<u32>;

    /// The descriptor for port `index` of plugin class `uri`.
    fn port_descriptor(&self, uri: &str, index: u32) -> Option<PortDescriptor>;

    /// Instantiate plugin `uri` at the given sample rate/period bounds
    /// with the given host feature flags.
    ///
    /// `[worker-thread]`
    fn instantiate(
        &self,
        uri: &str,
        host_info: Shared<HostInfo>,
        features: HostFeatures,
        log: Arc<dyn PluginLog>,
        coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginMainThread>, InstantiateError>;
}

#[derive(Debug, Clone)]
pub enum InstantiateError {
    UnsupportedUri(String),
    InstantiationFailed(String),
}

impl fmt::Display for InstantiateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiateError::UnsupportedUri(uri) => {
                write!(f, "plugin catalog does not support uri {}", uri)
            }
            InstantiateError::InstantiationFailed(uri) => {
                write!(f, "plugin library returned null instantiating {}", uri)
            }
        }
    }
}

impl std::error::Error for InstantiateError {}
