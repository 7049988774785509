//! Real-time-safe core of a modular audio-plugin host: the module
//! graph, its connection/ramp bookkeeping, the DAG scheduler, the
//! per-port-type multiplexer, and the UI/worker event router. The
//! audio backend, plugin discovery, and on-disk state encoding are
//! external collaborators this crate only defines the interfaces for
//! (`synthpod_plugin_api`).

pub mod app;
pub mod config;
pub mod connector;
pub mod error;
pub mod module;
pub mod multiplex;
pub mod port;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod worker;

pub use app::{App, ConnectionSnapshot, GraphSnapshot, ModuleSnapshot};
pub use config::{Config, SchedulingMode};
pub use connector::ConnectOutcome;
pub use error::{ConnectError, ModuleAddError};
pub use module::{Module, ModuleId, ModuleManager, ModuleUrn};
pub use port::{Port, PortAddr, PortIndex, RampState};
pub use registry::Registry;
pub use router::{Router, UiHandle, WorkerHandle};
pub use worker::{WorkerBridge, WorkerJob, WorkerReply};

pub use synthpod_plugin_api as plugin_api;
