//! The app façade: wires the registry, module manager, connector,
//! scheduler, multiplexer and router into the single-threaded context
//! the audio thread drives every period (§9 "Global mutable state":
//! `sp_app_t` kept as an explicit context value threaded through every
//! public operation rather than process-wide state).

use std::sync::Arc;

use basedrop::{Handle as CollHandle, Shared};

use synthpod_plugin_api::{
    HostFeatures, HostInfo, PluginCatalog, PluginLog, PortBufferRef, PortDirection, PortType,
    ProcInfo, ProcessStatus, Urid,
};

use crate::config::Config;
use crate::connector::{self, ConnectOutcome};
use crate::error::{ConnectError, ModuleAddError};
use crate::module::{Module, ModuleId, ModuleManager, ModuleUrn, Profile};
use crate::multiplex;
use crate::port::{Connectable, ControlPort, Port, PortAddr, PortIndex, PortPayload};
use crate::registry::Registry;
use crate::router::{Router, RoutedMessage, UiHandle, WorkerHandle};

/// A caller-facing snapshot of the graph, suitable for handing to an
/// external state-serializer (§6 "Graph state on disk"). The on-disk
/// encoding is the catalog's concern; this type is the "in-memory atom
/// tree" the spec describes, expressed as plain Rust data rather than
/// literal atoms so callers outside this crate don't need the atom
/// layer to round-trip a graph.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub modules: Vec<ModuleSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ModuleSnapshot {
    pub urn: ModuleUrn,
    pub uri: String,
    pub position: (f32, f32),
    pub disabled: bool,
    pub bypass: bool,
    pub control_values: Vec<(String, f32)>,
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub source_urn: ModuleUrn,
    pub source_symbol: String,
    pub sink_urn: ModuleUrn,
    pub sink_symbol: String,
}

/// The host's own address in `module_index` properties, distinguishing
/// "this patch object is for the app core itself" from "forward it to
/// module X" (§6 "Well-known messages").
const HOST_SELF_URI: &str = "urn:synthpod:host";

/// The URI a module's urn is interned under, so UI-facing patch
/// messages can name a module by a `Urid` the registry already knows
/// (§6 "Patch verbs": `module_index` carries either the host's own URI
/// or a module's interned urn URI).
fn module_urn_uri(urn: ModuleUrn) -> String {
    format!("urn:synthpod:module:{}", urn.0)
}

fn parse_module_urn_uri(uri: &str) -> Option<ModuleUrn> {
    uri.strip_prefix("urn:synthpod:module:")
        .and_then(|s| s.parse::<u128>().ok())
        .map(ModuleUrn)
}

/// The single-threaded app context (§9). One instance lives on the
/// audio thread; `UiHandle`/`WorkerHandle` are handed to the peers
/// across the ring boundary.
pub struct App {
    pub registry: Registry,
    pub modules: ModuleManager,
    pub router: Router,
    pub config: Config,
    next_urn: u128,
}

impl App {
    pub fn new(config: Config) -> (Self, UiHandle, WorkerHandle) {
        let (router, ui, worker) = Router::new(
            config.sequence_size as usize * 4,
            config.drain_timeout_periods,
        );
        let app = Self {
            registry: Registry::bootstrap(),
            modules: ModuleManager::new(),
            router,
            config,
            next_urn: 1,
        };
        (app, ui, worker)
    }

    fn mint_urn(&mut self) -> ModuleUrn {
        let urn = ModuleUrn(self.next_urn);
        self.next_urn += 1;
        urn
    }

    /// §4.2 `add`: builds every port for `uri` from `catalog`'s
    /// descriptors, initializes buffers to their documented defaults,
    /// and activates the instance. Worker-context only; the audio
    /// thread only ever sees the finished `Module` via `insert`.
    ///
    /// This is written so both the worker bridge's `MODULE_ADD`
    /// handler and `load` share one code path.
    pub fn instantiate_module(
        &mut self,
        uri: &str,
        catalog: &dyn PluginCatalog,
        host_info: Shared<HostInfo>,
        features: HostFeatures,
        log: Arc<dyn PluginLog>,
        coll_handle: &CollHandle,
    ) -> Result<Module, ModuleAddError> {
        let id = self.modules.reserve()?;

        if !catalog.is_supported(uri) {
            return Err(ModuleAddError::Unsupported(uri.to_string()));
        }

        let port_count = catalog.port_count(uri).unwrap_or(0);
        let mut ports = Vec::with_capacity(port_count as usize);
        for index in 0..port_count {
            let descriptor = catalog
                .port_descriptor(uri, index)
                .ok_or_else(|| ModuleAddError::Unsupported(uri.to_string()))?;

            let payload = match descriptor.port_type {
                PortType::Control => {
                    let hints = descriptor.control_hints.unwrap_or_default();
                    PortPayload::Control(ControlPort::new(hints))
                }
                PortType::Audio => PortPayload::Audio {
                    buffer: vec![0.0; self.config.max_block_size as usize],
                    last_peak: 0.0,
                    connectable: Connectable::default(),
                },
                PortType::Cv => PortPayload::Cv {
                    buffer: vec![0.0; self.config.max_block_size as usize],
                    last_peak: 0.0,
                    connectable: Connectable::default(),
                },
                PortType::Atom => {
                    let mut buffer = vec![0u8; self.config.sequence_size as usize];
                    let buffer_len = buffer.len();
                    let is_output = matches!(descriptor.direction, PortDirection::Output);
                    synthpod_plugin_api::atom::init_sequence(
                        &mut buffer,
                        buffer_len,
                        is_output,
                        self.registry.well_known.atom_sequence,
                    );
                    PortPayload::Atom {
                        buffer,
                        patchable: false,
                        connectable: Connectable::default(),
                        overflow_count: 0,
                    }
                }
            };

            ports.push(Port {
                symbol: descriptor.symbol,
                name: descriptor.name,
                direction: descriptor.direction,
                port_type: descriptor.port_type,
                protocol: self.registry.well_known.protocol_float,
                subscriptions: 0,
                payload,
            });
        }

        let mut main_thread = catalog
            .instantiate(uri, host_info, features, log, coll_handle)
            .map_err(ModuleAddError::Instantiate)?;
        let urn = self.mint_urn();
        self.registry.map(&module_urn_uri(urn));
        let worker_schedule: Arc<dyn synthpod_plugin_api::WorkerSchedule> = Arc::new(
            crate::worker::RingWorkerSchedule::new(urn, self.router.app_to_worker_handle()),
        );
        let audio_thread = main_thread
            .activate(
                self.config.sample_rate.0,
                self.config.min_block_size,
                self.config.max_block_size,
                worker_schedule,
                coll_handle,
            )
            .map_err(|e| ModuleAddError::Instantiate(
                synthpod_plugin_api::InstantiateError::InstantiationFailed(e.to_string()),
            ))?;

        Ok(Module {
            id,
            urn,
            uri: uri.to_string(),
            audio_thread,
            ports,
            profile: Profile::default(),
            dag: Default::default(),
            position: Default::default(),
            disabled: false,
            delete_request: false,
            bypass: false,
            automations: Default::default(),
        })
    }

    pub fn insert_module(&mut self, module: Module) -> Result<ModuleId, ModuleAddError> {
        let id = module.id;
        self.modules.insert(module)?;
        connector::dag_reorder(&mut self.modules);
        Ok(id)
    }

    pub fn connect(&mut self, src: PortAddr, snk: PortAddr) -> Result<ConnectOutcome, ConnectError> {
        connector::connect(&mut self.modules, src, snk, self.config.ramp_samples)
    }

    pub fn disconnect(&mut self, src: PortAddr, snk: PortAddr) -> Result<ConnectOutcome, ConnectError> {
        connector::disconnect(&mut self.modules, src, snk, self.config.ramp_samples)
    }

    pub fn concurrency_width(&self) -> u32 {
        connector::concurrency_width(&self.modules)
    }

    /// §4.2 `disable`: toggles a module's bypass. Disabling starts a
    /// `DownDisable` ramp on every connected source feeding the module's
    /// audio inputs; `disabled` itself only flips once that fade-out
    /// finishes (`apply_completed_ramps`, driven every `run_post`), so
    /// the module keeps running at a fading volume rather than cutting
    /// out. A module with no audio-input edges has nothing to fade, so
    /// it flips immediately. Re-enabling fades those same sources back
    /// in and un-bypasses right away — the connections were never
    /// touched, only silenced, so there is nothing to reconnect.
    pub fn set_disabled(&mut self, id: ModuleId, disabled: bool) {
        let ramp_samples = self.config.ramp_samples;
        let Some(module) = self.modules.get_mut(id) else {
            return;
        };

        let mut any_ramped = false;
        for port in module.ports.iter_mut() {
            if !port.is_input() || port.port_type != PortType::Audio {
                continue;
            }
            let Some(connectable) = port.connectable_mut() else {
                continue;
            };
            for source in connectable.iter_mut() {
                if disabled && source.ramp == crate::port::RampState::None {
                    source.ramp = crate::port::RampState::DownDisable;
                    source.remaining = ramp_samples;
                    any_ramped = true;
                } else if !disabled && source.ramp == crate::port::RampState::DownDisable {
                    source.ramp = crate::port::RampState::Up;
                    source.remaining = ramp_samples;
                }
            }
        }

        if disabled {
            if !any_ramped {
                self.modules.set_disabled(id, true);
            }
        } else {
            self.modules.set_disabled(id, false);
        }
    }

    /// §4.2 `del`, phase one: ramps down every downstream audio edge
    /// sourced from `id` with `RampState::DownDel`, and disconnects any
    /// non-audio (Cv/Atom) edge sourced from `id` immediately, since
    /// only audio has a ramp to wait on. `id`'s own input connections
    /// need no action — they vanish with its ports once phase two
    /// removes it from the vector.
    ///
    /// Returns the deleted urn immediately if `id` had nothing to ramp
    /// (nothing downstream to wait on); otherwise `None`, and the urn
    /// surfaces later in `run_post`'s return value once
    /// `apply_completed_ramps` sees the last ramp complete. Either way
    /// the caller hands that urn to its worker thread to deactivate and
    /// free the plugin instance.
    pub fn delete_module(&mut self, id: ModuleId) -> Option<ModuleUrn> {
        let ramp_samples = self.config.ramp_samples;
        let mut any_ramped = false;

        for module in self.modules.iter_mut() {
            if module.id == id {
                continue;
            }
            for port in module.ports.iter_mut() {
                if !port.is_input() {
                    continue;
                }
                let port_type = port.port_type;
                let Some(connectable) = port.connectable_mut() else {
                    continue;
                };
                if port_type == PortType::Audio {
                    for source in connectable.iter_mut() {
                        if source.port.module == id && source.ramp == crate::port::RampState::None {
                            source.ramp = crate::port::RampState::DownDel;
                            source.remaining = ramp_samples;
                            any_ramped = true;
                        }
                    }
                } else {
                    let stale: Vec<PortAddr> = connectable
                        .iter()
                        .filter(|s| s.port.module == id)
                        .map(|s| s.port)
                        .collect();
                    for addr in stale {
                        connectable.remove_plain(addr);
                    }
                }
            }
        }

        self.modules.request_delete(id);
        if any_ramped {
            None
        } else {
            self.modules.finalize_delete(id).map(|m| m.urn)
        }
    }

    /// The first half of one audio period (§2 "Data flow per audio
    /// period": `run_pre → drain(worker→app) → drain(UI→app) →
    /// drain(feedback) → schedule.step → ... `). A backend calls this
    /// from inside its own period callback before `run_post`;
    /// `nsamples` must not exceed `config.max_block_size`.
    ///
    /// Ticks the router's period/stall state, drains the three
    /// mailboxes in the order the data-flow diagram lists them, then
    /// runs the module vector in stored order, splitting it at each
    /// index with `ModuleManager::split_at_mut` so every module's
    /// multiplexer pass can read its already-processed predecessors'
    /// output buffers while writing its own (§4.4 "the ordering rule":
    /// `connect` keeps the vector topologically ordered as it links
    /// modules, so index order alone is sufficient here; `Parallel`
    /// scheduling only changes which slave thread executes a given
    /// index, never the dependency order, so one pass serves both modes
    /// here — `concurrency_width` is what a multi-threaded host uses to
    /// size its slave pool).
    pub fn run_pre(&mut self, nsamples: u32) {
        self.router.tick_period();

        let mut injections: Vec<(PortAddr, Vec<u8>)> = Vec::new();
        for msg in self.router.poll_from_worker(&self.registry, HOST_SELF_URI) {
            self.dispatch_routed(msg, &mut injections);
        }
        for msg in self.router.poll_from_ui(&self.registry, HOST_SELF_URI) {
            self.dispatch_routed(msg, &mut injections);
        }
        for msg in self.router.poll_feedback(&self.registry, HOST_SELF_URI) {
            self.dispatch_routed(msg, &mut injections);
        }

        let ramp_samples = self.config.ramp_samples;
        let sequence_urid = self.registry.well_known.atom_sequence;
        let proc_info = ProcInfo {
            frames: nsamples,
            period_counter: self.router.sequence().0,
        };

        let len = self.modules.len();
        for i in 0..len {
            let (processed, rest) = self.modules.split_at_mut(i);
            let Some((module, _)) = rest.split_first_mut() else {
                continue;
            };
            if !module.should_run() {
                continue;
            }
            let start = std::time::Instant::now();
            run_module(
                module,
                processed,
                &proc_info,
                ramp_samples,
                sequence_urid,
                self.registry.well_known.atom_object,
                &injections,
            );
            module.profile.record(start.elapsed());
        }
    }

    /// The second half of one audio period: finalizes completed ramps
    /// (deferred disconnects and two-phase module deletion) after
    /// `run_pre` has run every module. Returns the urns of any modules
    /// whose deletion finalized this period (§4.2 `del` phase two) —
    /// the caller hands each to its worker thread to deactivate and
    /// free the plugin instance.
    pub fn run_post(&mut self) -> Vec<ModuleUrn> {
        apply_completed_ramps(&mut self.modules)
    }

    /// Classifies one drained message and either logs it (host-bound)
    /// or stages its object to be spliced into the target plugin's
    /// atom-input sequence this period (§4.7 "All patch objects
    /// reaching the audio thread are filtered").
    fn dispatch_routed(&self, msg: RoutedMessage, injections: &mut Vec<(PortAddr, Vec<u8>)>) {
        match msg {
            RoutedMessage::ForHost(obj) => {
                log::trace!(target: "synthpod::router", "host-bound patch object otype={:?}", obj.otype);
            }
            RoutedMessage::ForPlugin { module, symbol, object } => {
                let Some(uri) = self.registry.unmap(module) else {
                    return;
                };
                let Some(urn) = parse_module_urn_uri(uri) else {
                    return;
                };
                let Some(target) = self.modules.iter().find(|m| m.urn == urn) else {
                    return;
                };
                let Some(port_index) = target.ports.iter().position(|p| p.symbol == symbol) else {
                    return;
                };
                let encoded = object.encode(&self.registry);
                let body = encoded[synthpod_plugin_api::atom::AtomHeader::SIZE..].to_vec();
                injections.push((
                    PortAddr { module: target.id, index: PortIndex(port_index as u32) },
                    body,
                ));
            }
        }
    }

    pub fn save(&self) -> GraphSnapshot {
        let mut modules = Vec::new();
        let mut connections = Vec::new();
        let urn_of = |id: ModuleId, mgr: &ModuleManager| mgr.get(id).map(|m| m.urn);

        for module in self.modules.iter() {
            let control_values = module
                .ports
                .iter()
                .filter_map(|p| match &p.payload {
                    PortPayload::Control(c) => Some((p.symbol.clone(), c.value)),
                    _ => None,
                })
                .collect();

            modules.push(ModuleSnapshot {
                urn: module.urn,
                uri: module.uri.clone(),
                position: (module.position.x, module.position.y),
                disabled: module.disabled,
                bypass: module.bypass,
                control_values,
            });

            for port in &module.ports {
                if let Some(connectable) = port.connectable() {
                    if !port.is_input() {
                        continue;
                    }
                    for source in connectable.iter() {
                        if let (Some(src_urn), Some(src_symbol)) = (
                            urn_of(source.port.module, &self.modules),
                            self.modules
                                .get(source.port.module)
                                .and_then(|m| m.ports.get(source.port.index.0 as usize))
                                .map(|p| p.symbol.clone()),
                        ) {
                            connections.push(ConnectionSnapshot {
                                source_urn: src_urn,
                                source_symbol: src_symbol,
                                sink_urn: module.urn,
                                sink_symbol: port.symbol.clone(),
                            });
                        }
                    }
                }
            }
        }

        GraphSnapshot { modules, connections }
    }

    pub fn clear(&mut self) {
        self.modules = ModuleManager::new();
    }

    /// §8 invariant 10: `save(state); clear(); load(state)` reproduces
    /// the same module set, connections, and control-port values.
    /// Instantiation goes straight through `catalog` (what the worker
    /// would otherwise do asynchronously) since a restore blocks the
    /// graph until complete in any case (§4.7 DRAIN/BLOCK/WAIT).
    pub fn load(
        &mut self,
        snapshot: &GraphSnapshot,
        catalog: &dyn PluginCatalog,
        host_info: Shared<HostInfo>,
        features: HostFeatures,
        log: Arc<dyn PluginLog>,
        coll_handle: &CollHandle,
    ) -> Result<(), ModuleAddError> {
        let mut urn_to_id = std::collections::HashMap::new();

        for snap in &snapshot.modules {
            let mut module = self.instantiate_module(
                &snap.uri,
                catalog,
                host_info.clone(),
                features,
                log.clone(),
                coll_handle,
            )?;
            module.urn = snap.urn;
            self.registry.map(&module_urn_uri(snap.urn));
            module.position.x = snap.position.0;
            module.position.y = snap.position.1;
            module.disabled = snap.disabled;
            module.bypass = snap.bypass;
            for (symbol, value) in &snap.control_values {
                if let Some(port) = module.ports.iter_mut().find(|p| &p.symbol == symbol) {
                    if let PortPayload::Control(c) = &mut port.payload {
                        c.value = *value;
                        c.stash = *value;
                        c.last_sent = *value;
                    }
                }
            }
            let id = module.id;
            urn_to_id.insert(snap.urn, id);
            self.insert_module(module)?;
        }

        for conn in &snapshot.connections {
            let (Some(&src_id), Some(&snk_id)) =
                (urn_to_id.get(&conn.source_urn), urn_to_id.get(&conn.sink_urn))
            else {
                continue;
            };
            let src_index = self
                .modules
                .get(src_id)
                .and_then(|m| m.ports.iter().position(|p| p.symbol == conn.source_symbol));
            let snk_index = self
                .modules
                .get(snk_id)
                .and_then(|m| m.ports.iter().position(|p| p.symbol == conn.sink_symbol));
            if let (Some(si), Some(ki)) = (src_index, snk_index) {
                let _ = self.connect(
                    PortAddr {
                        module: src_id,
                        index: PortIndex(si as u32),
                    },
                    PortAddr {
                        module: snk_id,
                        index: PortIndex(ki as u32),
                    },
                );
            }
        }

        Ok(())
    }
}

/// Resolves `addr` to a pointer into an already-processed predecessor's
/// audio output buffer (`processed` is the prefix `App::run_pre`
/// split off before the current module).
fn resolve_audio(addr: PortAddr, processed: &[Module]) -> Option<*const f32> {
    let m = processed.iter().find(|m| m.id == addr.module)?;
    let p = m.ports.get(addr.index.0 as usize)?;
    match &p.payload {
        PortPayload::Audio { buffer, .. } => Some(buffer.as_ptr()),
        _ => None,
    }
}

fn resolve_cv(addr: PortAddr, processed: &[Module]) -> Option<*const f32> {
    let m = processed.iter().find(|m| m.id == addr.module)?;
    let p = m.ports.get(addr.index.0 as usize)?;
    match &p.payload {
        PortPayload::Cv { buffer, .. } => Some(buffer.as_ptr()),
        _ => None,
    }
}

fn resolve_atom<'a>(addr: PortAddr, processed: &'a [Module]) -> Option<&'a [u8]> {
    let m = processed.iter().find(|m| m.id == addr.module)?;
    let p = m.ports.get(addr.index.0 as usize)?;
    match &p.payload {
        PortPayload::Atom { buffer, .. } => Some(buffer.as_slice()),
        _ => None,
    }
}

/// Wraps one already-encoded object atom as a single-event
/// `atom:Sequence` at frame 0, so it can be handed to
/// `multiplex::multiplex_atom_sequence` as just another source.
fn synth_event_buffer(sequence_urid: Urid, atom_object_urid: Urid, object_body: &[u8]) -> Vec<u8> {
    use synthpod_plugin_api::atom::{pad_size, AtomHeader, SequenceBody, SequenceEventHeader, SequenceWriter};

    let capacity = AtomHeader::SIZE
        + SequenceBody::SIZE
        + SequenceEventHeader::SIZE
        + AtomHeader::SIZE
        + pad_size(object_body.len());
    let mut buf = vec![0u8; capacity];
    let mut writer = SequenceWriter::new(&mut buf, sequence_urid);
    writer.push_event(0, atom_object_urid, object_body);
    buf
}

/// Runs one module's multiplexer pass against its already-processed
/// predecessors, then calls its plugin's `process` (§4.5/§4.6).
fn run_module(
    module: &mut Module,
    processed: &[Module],
    proc_info: &ProcInfo,
    ramp_samples: u32,
    sequence_urid: Urid,
    atom_object_urid: Urid,
    injections: &[(PortAddr, Vec<u8>)],
) {
    let nsamples = proc_info.frames as usize;

    for (index, port) in module.ports.iter_mut().enumerate() {
        let is_input = port.is_input();
        let port_addr = PortAddr { module: module.id, index: PortIndex(index as u32) };
        match &mut port.payload {
            PortPayload::Control(control) => control.try_pull_stash(),
            PortPayload::Audio { buffer, connectable, .. } => {
                let mut sources: Vec<_> = connectable.iter().copied().collect();
                multiplex::multiplex_audio(
                    &mut buffer[..nsamples],
                    &mut sources,
                    proc_info.frames,
                    ramp_samples,
                    |addr| resolve_audio(addr, processed),
                );
                for (s, updated) in connectable.iter_mut().zip(sources.iter()) {
                    *s = *updated;
                }
            }
            PortPayload::Cv { buffer, connectable, .. } => {
                multiplex::multiplex_cv(
                    &mut buffer[..nsamples],
                    &connectable.iter().copied().collect::<Vec<_>>(),
                    proc_info.frames,
                    |addr| resolve_cv(addr, processed),
                );
            }
            PortPayload::Atom { buffer, connectable, overflow_count, .. } => {
                // An injected patch object (from a UI/worker/feedback
                // mailbox, routed to this exact port by `App::run_pre`)
                // is spliced in as a synthetic one-event source
                // alongside the port's real connections, so a port with
                // no audio-graph predecessors still receives it.
                let injected: Vec<Vec<u8>> = injections
                    .iter()
                    .filter(|(addr, _)| *addr == port_addr)
                    .map(|(_, body)| synth_event_buffer(sequence_urid, atom_object_urid, body))
                    .collect();
                if is_input && (!connectable.is_empty() || !injected.is_empty()) {
                    let source_bufs = connectable
                        .iter()
                        .filter_map(|s| resolve_atom(s.port, processed))
                        .chain(injected.iter().map(|b| b.as_slice()));
                    *overflow_count += multiplex::multiplex_atom_sequence(
                        buffer,
                        sequence_urid,
                        source_bufs,
                    );
                }
            }
        }
    }

    let mut port_refs: Vec<PortBufferRef> = Vec::with_capacity(module.ports.len());
    for port in module.ports.iter_mut() {
        let r = match &mut port.payload {
            PortPayload::Control(c) => PortBufferRef::Control(&mut c.value),
            PortPayload::Audio { buffer, .. } => PortBufferRef::Audio(&mut buffer[..nsamples]),
            PortPayload::Cv { buffer, .. } => PortBufferRef::Audio(&mut buffer[..nsamples]),
            PortPayload::Atom { buffer, .. } => PortBufferRef::Atom(buffer.as_mut_slice()),
        };
        port_refs.push(r);
    }

    if module.audio_thread.process(proc_info, &mut port_refs) == ProcessStatus::Error {
        log::trace!(target: "synthpod::scheduler", "module {} returned ProcessStatus::Error", module.uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use synthpod_plugin_api::{
        ControlPortHints, InstantiateError, LogLevel, PluginAudioThread, PluginMainThread,
        PortBufferType,
    };

    struct NullLog;
    impl PluginLog for NullLog {
        fn log(&self, _level: LogLevel, _message: &str) {}
    }

    struct ConstAudio(f32);
    impl PluginAudioThread for ConstAudio {
        fn process(&mut self, info: &ProcInfo, ports: &mut [PortBufferRef<'_>]) -> ProcessStatus {
            if let PortBufferRef::Audio(buf) = &mut ports[0] {
                let n = info.frames as usize;
                for s in buf.iter_mut().take(n) {
                    *s = self.0;
                }
            }
            ProcessStatus::Continue
        }
    }

    struct ConstMain(f32);
    impl PluginMainThread for ConstMain {
        fn activate(
            &mut self,
            _sample_rate: f64,
            _min_frames: u32,
            _max_frames: u32,
            _worker: Arc<dyn synthpod_plugin_api::WorkerSchedule>,
            _coll_handle: &basedrop::Handle,
        ) -> Result<Box<dyn PluginAudioThread>, Box<dyn std::error::Error>> {
            Ok(Box::new(ConstAudio(self.0)))
        }
        fn deactivate(&mut self) {}
    }

    /// `in`@0 (audio), `gain`@1 (control), `out`@2 (audio).
    struct GainAudio;
    impl PluginAudioThread for GainAudio {
        fn process(&mut self, info: &ProcInfo, ports: &mut [PortBufferRef<'_>]) -> ProcessStatus {
            let nsamples = info.frames as usize;
            let gain = match &ports[1] {
                PortBufferRef::Control(c) => **c,
                _ => 1.0,
            };
            let mut input = vec![0.0f32; nsamples];
            if let PortBufferRef::Audio(buf) = &ports[0] {
                for (dst, src) in input.iter_mut().zip(buf.iter()) {
                    *dst = *src;
                }
            }
            if let PortBufferRef::Audio(out) = &mut ports[2] {
                for (o, i) in out.iter_mut().zip(input.iter()) {
                    *o = *i * gain;
                }
            }
            ProcessStatus::Continue
        }
    }

    struct GainMain;
    impl PluginMainThread for GainMain {
        fn activate(
            &mut self,
            _sample_rate: f64,
            _min_frames: u32,
            _max_frames: u32,
            _worker: Arc<dyn synthpod_plugin_api::WorkerSchedule>,
            _coll_handle: &basedrop::Handle,
        ) -> Result<Box<dyn PluginAudioThread>, Box<dyn std::error::Error>> {
            Ok(Box::new(GainAudio))
        }
        fn deactivate(&mut self) {}
    }

    struct SinkAudio(Arc<Mutex<Vec<f32>>>);
    impl PluginAudioThread for SinkAudio {
        fn process(&mut self, info: &ProcInfo, ports: &mut [PortBufferRef<'_>]) -> ProcessStatus {
            if let PortBufferRef::Audio(buf) = &ports[0] {
                *self.0.lock().unwrap() = buf.iter().take(info.frames as usize).copied().collect();
            }
            ProcessStatus::Continue
        }
    }

    struct SinkMain(Arc<Mutex<Vec<f32>>>);
    impl PluginMainThread for SinkMain {
        fn activate(
            &mut self,
            _sample_rate: f64,
            _min_frames: u32,
            _max_frames: u32,
            _worker: Arc<dyn synthpod_plugin_api::WorkerSchedule>,
            _coll_handle: &basedrop::Handle,
        ) -> Result<Box<dyn PluginAudioThread>, Box<dyn std::error::Error>> {
            Ok(Box::new(SinkAudio(self.0.clone())))
        }
        fn deactivate(&mut self) {}
    }

    enum Kind {
        Const(f32),
        Gain,
        Sink(Arc<Mutex<Vec<f32>>>),
    }

    #[derive(Default)]
    struct TestCatalog {
        kinds: HashMap<String, Kind>,
    }

    impl TestCatalog {
        fn add(&mut self, uri: &str, kind: Kind) {
            self.kinds.insert(uri.to_string(), kind);
        }
    }

    fn port(symbol: &str, direction: PortDirection, port_type: PortType, hints: Option<ControlPortHints>) -> synthpod_plugin_api::PortDescriptor {
        synthpod_plugin_api::PortDescriptor {
            index: 0,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            direction,
            port_type,
            buffer_type: PortBufferType::None,
            control_hints: hints,
            designation: None,
        }
    }

    impl PluginCatalog for TestCatalog {
        fn is_supported(&self, uri: &str) -> bool {
            self.kinds.contains_key(uri)
        }

        fn port_count(&self, uri: &str) -> Option<u32> {
            match self.kinds.get(uri)? {
                Kind::Const(_) => Some(1),
                Kind::Gain => Some(3),
                Kind::Sink(_) => Some(1),
            }
        }

        fn port_descriptor(&self, uri: &str, index: u32) -> Option<synthpod_plugin_api::PortDescriptor> {
            let kind = self.kinds.get(uri)?;
            let mut d = match (kind, index) {
                (Kind::Const(_), 0) => port("out", PortDirection::Output, PortType::Audio, None),
                (Kind::Gain, 0) => port("in", PortDirection::Input, PortType::Audio, None),
                (Kind::Gain, 1) => port(
                    "gain",
                    PortDirection::Input,
                    PortType::Control,
                    Some(ControlPortHints {
                        default: 1.0,
                        min: 0.0,
                        max: 4.0,
                        ..Default::default()
                    }),
                ),
                (Kind::Gain, 2) => port("out", PortDirection::Output, PortType::Audio, None),
                (Kind::Sink(_), 0) => port("in", PortDirection::Input, PortType::Audio, None),
                _ => return None,
            };
            d.index = index;
            Some(d)
        }

        fn instantiate(
            &self,
            uri: &str,
            _host_info: Shared<HostInfo>,
            _features: HostFeatures,
            _log: Arc<dyn PluginLog>,
            _coll_handle: &CollHandle,
        ) -> Result<Box<dyn PluginMainThread>, InstantiateError> {
            match self.kinds.get(uri) {
                Some(Kind::Const(v)) => Ok(Box::new(ConstMain(*v))),
                Some(Kind::Gain) => Ok(Box::new(GainMain)),
                Some(Kind::Sink(capture)) => Ok(Box::new(SinkMain(capture.clone()))),
                None => Err(InstantiateError::UnsupportedUri(uri.to_string())),
            }
        }
    }

    const NSAMPLES: u32 = 64;

    fn test_env() -> (Shared<HostInfo>, CollHandle) {
        let coll_handle = basedrop::Collector::new().handle();
        let host_info = Shared::new(
            &coll_handle,
            HostInfo {
                name: "test".into(),
                sample_rate: meadowlark_core_types::time::SampleRate(48_000.0),
                min_block_size: 1,
                max_block_size: 512,
            },
        );
        (host_info, coll_handle)
    }

    fn add_module(app: &mut App, catalog: &TestCatalog, uri: &str, host_info: Shared<HostInfo>, coll_handle: &CollHandle) -> ModuleId {
        let module = app
            .instantiate_module(uri, catalog, host_info, HostFeatures::empty(), Arc::new(NullLog), coll_handle)
            .unwrap();
        app.insert_module(module).unwrap()
    }

    fn run_until_ramps_settle(app: &mut App) {
        // ramp_samples defaults to max_block_size (512); NSAMPLES-sized
        // periods need a few more than that many calls to fully settle.
        let periods = app.config.ramp_samples / NSAMPLES + 2;
        for _ in 0..periods {
            app.run_pre(NSAMPLES);
            app.run_post();
        }
    }

    /// S1: a single source feeding a unity-gain module feeding a sink
    /// reproduces the source's value once its connection ramps settle.
    #[test]
    fn s1_passthrough_chain_reproduces_source_value() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const", Kind::Const(2.0));
        catalog.add("test:gain", Kind::Gain);
        let capture = Arc::new(Mutex::new(Vec::new()));
        catalog.add("test:sink", Kind::Sink(capture.clone()));

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let src = add_module(&mut app, &catalog, "test:const", host_info.clone(), &coll_handle);
        let gain = add_module(&mut app, &catalog, "test:gain", host_info.clone(), &coll_handle);
        let sink = add_module(&mut app, &catalog, "test:sink", host_info, &coll_handle);

        app.connect(PortAddr { module: src, index: PortIndex(0) }, PortAddr { module: gain, index: PortIndex(0) })
            .unwrap();
        app.connect(PortAddr { module: gain, index: PortIndex(2) }, PortAddr { module: sink, index: PortIndex(0) })
            .unwrap();

        run_until_ramps_settle(&mut app);

        let out = capture.lock().unwrap();
        assert!(out.iter().all(|&s| (s - 2.0).abs() < 1e-3), "{:?}", out);
    }

    /// S2: two sources connected to the same sink audio input are
    /// summed once their ramps settle.
    #[test]
    fn s2_merge_sums_two_sources_into_one_sink() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const_a", Kind::Const(1.0));
        catalog.add("test:const_b", Kind::Const(3.0));
        let capture = Arc::new(Mutex::new(Vec::new()));
        catalog.add("test:sink", Kind::Sink(capture.clone()));

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let a = add_module(&mut app, &catalog, "test:const_a", host_info.clone(), &coll_handle);
        let b = add_module(&mut app, &catalog, "test:const_b", host_info.clone(), &coll_handle);
        let sink = add_module(&mut app, &catalog, "test:sink", host_info, &coll_handle);

        app.connect(PortAddr { module: a, index: PortIndex(0) }, PortAddr { module: sink, index: PortIndex(0) })
            .unwrap();
        app.connect(PortAddr { module: b, index: PortIndex(0) }, PortAddr { module: sink, index: PortIndex(0) })
            .unwrap();

        run_until_ramps_settle(&mut app);

        let out = capture.lock().unwrap();
        assert!(out.iter().all(|&s| (s - 4.0).abs() < 1e-3), "{:?}", out);
    }

    /// S3: disconnecting an audio sink defers to a ramp-down; once it
    /// completes the source's contribution has decayed to zero and the
    /// connection is gone.
    #[test]
    fn s3_disconnect_ramps_down_to_silence() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const", Kind::Const(5.0));
        let capture = Arc::new(Mutex::new(Vec::new()));
        catalog.add("test:sink", Kind::Sink(capture.clone()));

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let src = add_module(&mut app, &catalog, "test:const", host_info.clone(), &coll_handle);
        let sink = add_module(&mut app, &catalog, "test:sink", host_info, &coll_handle);
        let src_addr = PortAddr { module: src, index: PortIndex(0) };
        let sink_addr = PortAddr { module: sink, index: PortIndex(0) };

        app.connect(src_addr, sink_addr).unwrap();
        run_until_ramps_settle(&mut app);
        assert!((capture.lock().unwrap().last().copied().unwrap_or(0.0) - 5.0).abs() < 1e-3);

        let outcome = app.disconnect(src_addr, sink_addr).unwrap();
        assert_eq!(outcome, ConnectOutcome::DeferredToRampDown);

        run_until_ramps_settle(&mut app);

        let out = capture.lock().unwrap();
        assert!(out.iter().all(|&s| s.abs() < 1e-3), "{:?}", out);
        let sink_port = &app.modules.get(sink).unwrap().ports[0];
        assert!(!sink_port.connectable().unwrap().contains(src_addr));
    }

    /// `disable` fades a module's audio inputs to silence without
    /// dropping the connection, then flips `disabled`; re-enabling fades
    /// them back in and resumes immediately.
    #[test]
    fn disable_fades_to_silence_then_reenable_restores_the_signal() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const", Kind::Const(5.0));
        let capture = Arc::new(Mutex::new(Vec::new()));
        catalog.add("test:sink", Kind::Sink(capture.clone()));

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let src = add_module(&mut app, &catalog, "test:const", host_info.clone(), &coll_handle);
        let sink = add_module(&mut app, &catalog, "test:sink", host_info, &coll_handle);
        let src_addr = PortAddr { module: src, index: PortIndex(0) };
        let sink_addr = PortAddr { module: sink, index: PortIndex(0) };

        app.connect(src_addr, sink_addr).unwrap();
        run_until_ramps_settle(&mut app);
        assert!((capture.lock().unwrap().last().copied().unwrap_or(0.0) - 5.0).abs() < 1e-3);

        app.set_disabled(sink, true);
        run_until_ramps_settle(&mut app);

        assert!(capture.lock().unwrap().iter().all(|&s| s.abs() < 1e-3));
        assert!(app.modules.get(sink).unwrap().disabled);
        let sink_port = &app.modules.get(sink).unwrap().ports[0];
        assert!(sink_port.connectable().unwrap().contains(src_addr));

        app.set_disabled(sink, false);
        assert!(!app.modules.get(sink).unwrap().disabled);
        run_until_ramps_settle(&mut app);

        assert!((capture.lock().unwrap().last().copied().unwrap_or(0.0) - 5.0).abs() < 1e-3);
    }

    /// `del` ramps a deleted module's downstream edge to silence before
    /// removing it from the graph; the sink's connection to it is gone
    /// once the ramp settles.
    #[test]
    fn delete_module_ramps_downstream_edge_then_removes_the_module() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const", Kind::Const(5.0));
        let capture = Arc::new(Mutex::new(Vec::new()));
        catalog.add("test:sink", Kind::Sink(capture.clone()));

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let src = add_module(&mut app, &catalog, "test:const", host_info.clone(), &coll_handle);
        let sink = add_module(&mut app, &catalog, "test:sink", host_info, &coll_handle);
        let src_addr = PortAddr { module: src, index: PortIndex(0) };
        let sink_addr = PortAddr { module: sink, index: PortIndex(0) };

        app.connect(src_addr, sink_addr).unwrap();
        run_until_ramps_settle(&mut app);
        assert!((capture.lock().unwrap().last().copied().unwrap_or(0.0) - 5.0).abs() < 1e-3);

        let src_urn = app.modules.get(src).unwrap().urn;
        assert_eq!(app.delete_module(src), None);
        assert!(app.modules.get(src).is_some(), "still running out its fade-out ramp");

        let periods = app.config.ramp_samples / NSAMPLES + 2;
        let mut deleted = Vec::new();
        for _ in 0..periods {
            app.run_pre(NSAMPLES);
            deleted.extend(app.run_post());
        }

        assert!(capture.lock().unwrap().iter().all(|&s| s.abs() < 1e-3));
        assert!(app.modules.get(src).is_none());
        assert_eq!(deleted, vec![src_urn]);
    }

    /// Deleting a module with no downstream audio edges has nothing to
    /// ramp, so it is removed immediately.
    #[test]
    fn delete_module_with_no_downstream_edges_is_removed_immediately() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const", Kind::Const(1.0));
        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let src = add_module(&mut app, &catalog, "test:const", host_info, &coll_handle);
        let src_urn = app.modules.get(src).unwrap().urn;

        assert_eq!(app.delete_module(src), Some(src_urn));
        assert!(app.modules.get(src).is_none());
    }

    /// S4: two independent source→gain chains feeding one sink report a
    /// concurrency width of 2 (the two chains have no dependency on each
    /// other); collapsing them into a single chain drops it to 1.
    #[test]
    fn s4_concurrency_width_reflects_independent_chains() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const_a", Kind::Const(1.0));
        catalog.add("test:const_b", Kind::Const(1.0));
        catalog.add("test:gain", Kind::Gain);

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let a = add_module(&mut app, &catalog, "test:const_a", host_info.clone(), &coll_handle);
        let b = add_module(&mut app, &catalog, "test:const_b", host_info.clone(), &coll_handle);
        let gain_a = add_module(&mut app, &catalog, "test:gain", host_info.clone(), &coll_handle);
        let gain_b = add_module(&mut app, &catalog, "test:gain", host_info, &coll_handle);

        app.connect(PortAddr { module: a, index: PortIndex(0) }, PortAddr { module: gain_a, index: PortIndex(0) })
            .unwrap();
        app.connect(PortAddr { module: b, index: PortIndex(0) }, PortAddr { module: gain_b, index: PortIndex(0) })
            .unwrap();

        assert_eq!(app.concurrency_width(), 2);
    }

    /// S5: a sink's connectable rejects a 33rd distinct source.
    #[test]
    fn s5_connect_enforces_max_sources_per_sink() {
        let mut catalog = TestCatalog::default();
        let capture = Arc::new(Mutex::new(Vec::new()));
        catalog.add("test:sink", Kind::Sink(capture));

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let sink = add_module(&mut app, &catalog, "test:sink", host_info.clone(), &coll_handle);
        let mut sources = Vec::new();
        for i in 0..crate::config::MAX_SOURCES_PER_SINK {
            let uri = format!("test:const_{i}");
            catalog.add(&uri, Kind::Const(1.0));
            sources.push(add_module(&mut app, &catalog, &uri, host_info.clone(), &coll_handle));
        }
        for &src in &sources {
            app.connect(PortAddr { module: src, index: PortIndex(0) }, PortAddr { module: sink, index: PortIndex(0) })
                .unwrap();
        }

        let uri = "test:const_overflow".to_string();
        catalog.add(&uri, Kind::Const(1.0));
        let overflow = add_module(&mut app, &catalog, &uri, host_info, &coll_handle);
        assert_eq!(
            app.connect(PortAddr { module: overflow, index: PortIndex(0) }, PortAddr { module: sink, index: PortIndex(0) }),
            Err(ConnectError::Capacity)
        );
    }

    /// S6: `save`/`clear`/`load` reproduces the same module set,
    /// connections, and control-port values.
    #[test]
    fn s6_save_clear_load_round_trips_the_graph() {
        let mut catalog = TestCatalog::default();
        catalog.add("test:const", Kind::Const(1.0));
        catalog.add("test:gain", Kind::Gain);

        let (host_info, coll_handle) = test_env();
        let (mut app, _ui, _worker) = App::new(Config::default());

        let src = add_module(&mut app, &catalog, "test:const", host_info.clone(), &coll_handle);
        let gain = add_module(&mut app, &catalog, "test:gain", host_info.clone(), &coll_handle);
        app.connect(PortAddr { module: src, index: PortIndex(0) }, PortAddr { module: gain, index: PortIndex(0) })
            .unwrap();
        if let PortPayload::Control(c) = &mut app.modules.get_mut(gain).unwrap().ports[1].payload {
            c.value = 2.5;
            c.stash = 2.5;
        }

        let snapshot = app.save();
        assert_eq!(snapshot.modules.len(), 2);
        assert_eq!(snapshot.connections.len(), 1);

        app.clear();
        assert_eq!(app.modules.len(), 0);

        app.load(&snapshot, &catalog, host_info, HostFeatures::empty(), Arc::new(NullLog), &coll_handle)
            .unwrap();

        assert_eq!(app.modules.len(), 2);
        let restored = app.save();
        assert_eq!(restored.connections.len(), 1);
        let gain_snapshot = restored
            .modules
            .iter()
            .find(|m| m.uri == "test:gain")
            .unwrap();
        let (_, gain_value) = gain_snapshot
            .control_values
            .iter()
            .find(|(symbol, _)| symbol == "gain")
            .unwrap();
        assert!((gain_value - 2.5).abs() < 1e-6);
    }
}

/// Drains every port's completed ramps, flips the terminal bookkeeping
/// each one implies, and finalizes (§4.2 `del` phase two) any module
/// whose last outstanding `DownDel` ramp just completed. A module fed
/// into several sinks gets one `pending_deletes` entry per downstream
/// edge but only one `finalize_delete` call, since all such ramps
/// share a start time and so complete within the same period.
fn apply_completed_ramps(modules: &mut ModuleManager) -> Vec<ModuleUrn> {
    let mut pending_deletes = Vec::new();
    let mut pending_disables = Vec::new();
    let mut edges_dropped = false;

    for module in modules.iter_mut() {
        for port in module.ports.iter_mut() {
            if let Some(connectable) = port.connectable_mut() {
                connectable.drain_completed_ramps(|port_addr, terminal| {
                    use crate::port::RampState;
                    match terminal {
                        RampState::DownDel => pending_deletes.push(port_addr.module),
                        RampState::DownDisable => pending_disables.push(port_addr.module),
                        _ => edges_dropped = true,
                    }
                });
            }
        }
    }

    pending_deletes.sort();
    pending_deletes.dedup();
    let mut deleted_urns = Vec::new();
    for id in pending_deletes {
        modules.request_delete(id);
        if let Some(module) = modules.finalize_delete(id) {
            deleted_urns.push(module.urn);
        }
    }
    for id in pending_disables {
        modules.set_disabled(id, true);
    }

    // A ramp-down that drops a source entry or removes a module changes
    // fan-in/fan-out for the modules it touched (§8 invariant 2); the
    // ordinary `connect`/`disconnect` path already reorders, but a
    // deferred ramp's completion only surfaces here.
    if edges_dropped || !deleted_urns.is_empty() {
        connector::dag_reorder(modules);
    }

    deleted_urns
}
