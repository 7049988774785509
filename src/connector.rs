//! C4: validates and performs connect/disconnect requests, and
//! recomputes the DAG bookkeeping (`dag_reorder`, `concurrency_width`)
//! that the scheduler consumes. Grounded on spec §4.4 and
//! `original_source/lib/synthpod_app.c`'s `_dag_reorder`-shaped logic.

use crate::error::ConnectError;
use crate::module::{DagNode, ModuleId, ModuleManager};
use crate::port::{PortAddr, RampState};

/// Outcome of a `connect`/`disconnect` call (§4.4: connect is
/// idempotent and returns "no-op" if already connected; disconnect of
/// an audio sink is deferred to ramp completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
    Disconnected,
    DeferredToRampDown,
    AlreadyDisconnected,
}

fn port_type_matches(
    modules: &ModuleManager,
    src: PortAddr,
    snk: PortAddr,
) -> Result<bool, ConnectError> {
    let src_port = modules
        .get(src.module)
        .and_then(|m| m.ports.get(src.index.0 as usize))
        .ok_or(ConnectError::DirectionMismatch)?;
    let snk_port = modules
        .get(snk.module)
        .and_then(|m| m.ports.get(snk.index.0 as usize))
        .ok_or(ConnectError::DirectionMismatch)?;

    if !src_port.is_output() || !snk_port.is_input() {
        return Err(ConnectError::DirectionMismatch);
    }
    Ok(src_port.port_type == snk_port.port_type)
}

/// `connect(src, snk)` (§4.4).
///
/// Audio sinks get a fresh entry ramping `Up` over `ramp_samples`;
/// every other sink type connects atomically. Calls `dag_reorder` on
/// success as the spec mandates.
pub fn connect(
    modules: &mut ModuleManager,
    src: PortAddr,
    snk: PortAddr,
    ramp_samples: u32,
) -> Result<ConnectOutcome, ConnectError> {
    if !port_type_matches(modules, src, snk)? {
        return Err(ConnectError::TypeMismatch);
    }

    let snk_module = modules.get_mut(snk.module).ok_or(ConnectError::DirectionMismatch)?;
    let snk_port = snk_module
        .ports
        .get_mut(snk.index.0 as usize)
        .ok_or(ConnectError::DirectionMismatch)?;
    let is_audio = matches!(snk_port.port_type, synthpod_plugin_api::PortType::Audio);
    let connectable = snk_port.connectable_mut().ok_or(ConnectError::TypeMismatch)?;

    if connectable.contains(src) {
        return Ok(ConnectOutcome::AlreadyConnected);
    }
    if connectable.is_full() {
        return Err(ConnectError::Capacity);
    }

    let inserted = if is_audio {
        connectable.push_ramped_up(src, ramp_samples)
    } else {
        connectable.push_plain(src)
    };
    debug_assert!(inserted);

    dag_reorder(modules);
    topological_reorder(modules);
    Ok(ConnectOutcome::Connected)
}

/// `disconnect(src, snk)` (§4.4).
pub fn disconnect(
    modules: &mut ModuleManager,
    src: PortAddr,
    snk: PortAddr,
    ramp_samples: u32,
) -> Result<ConnectOutcome, ConnectError> {
    let snk_module = modules.get_mut(snk.module).ok_or(ConnectError::DirectionMismatch)?;
    let snk_port = snk_module
        .ports
        .get_mut(snk.index.0 as usize)
        .ok_or(ConnectError::DirectionMismatch)?;
    let is_audio = matches!(snk_port.port_type, synthpod_plugin_api::PortType::Audio);
    let connectable = snk_port.connectable_mut().ok_or(ConnectError::TypeMismatch)?;

    if !connectable.contains(src) {
        return Ok(ConnectOutcome::AlreadyDisconnected);
    }

    if is_audio {
        let began = connectable.begin_ramp_down(src, ramp_samples, RampState::Down);
        debug_assert!(began);
        return Ok(ConnectOutcome::DeferredToRampDown);
    }

    connectable.remove_plain(src);
    dag_reorder(modules);
    Ok(ConnectOutcome::Disconnected)
}

/// Recomputes each module's `num_sources`/`sinks` from the live
/// connectables (§4.4 `dag_reorder`). Does not permute the module
/// vector itself — `connect`'s `topological_reorder` pass, run right
/// after this one, is what keeps the vector in source-before-sink
/// order.
///
/// `num_sources` counts distinct predecessor *modules*, not raw
/// connections: a module can feed a sink through more than one port
/// pair, and the Kahn relaxation in `concurrency_width` (and the
/// parallel scheduler's ready-set derivation) decrements a module's
/// count once per predecessor, via the de-duplicated `sinks` list — the
/// two must agree or a module with more than one connection from the
/// same predecessor would never reach a zero count.
pub fn dag_reorder(modules: &mut ModuleManager) {
    let ids: Vec<ModuleId> = modules.iter().map(|m| m.id).collect();
    let mut nodes: Vec<DagNode> = ids.iter().map(|_| DagNode::default()).collect();
    let index_of = |id: ModuleId| ids.iter().position(|&x| x == id);

    for (i, &mi) in ids.iter().enumerate() {
        let module = match modules.get(mi) {
            Some(m) => m,
            None => continue,
        };
        let mut source_modules: smallvec::SmallVec<[ModuleId; 8]> = smallvec::SmallVec::new();
        for port in &module.ports {
            if let Some(connectable) = port.connectable() {
                if !port.is_input() {
                    continue;
                }
                for source in connectable.iter() {
                    if index_of(source.port.module).is_some() && !source_modules.contains(&source.port.module) {
                        source_modules.push(source.port.module);
                    }
                }
            }
        }
        for src in source_modules {
            if let Some(j) = index_of(src) {
                if j != i {
                    nodes[j].sinks.push(mi);
                }
                nodes[i].num_sources += 1;
            }
        }
    }

    for (i, &mi) in ids.iter().enumerate() {
        if let Some(m) = modules.get_mut(mi) {
            m.dag = nodes[i].clone();
        }
    }
}

/// Physically permutes the module vector into a topological order
/// consistent with `dag_reorder`'s freshly-recomputed `num_sources`/
/// `sinks` (§4.4/§9 "the ordering rule": a `module_move` the spec
/// leaves to an external UI/module-manager collaborator — performed
/// here instead so `App::run_period`'s index-split scheduling always
/// sees sources before their sinks, regardless of insertion order).
fn topological_reorder(modules: &mut ModuleManager) {
    let ids: Vec<ModuleId> = modules.iter().map(|m| m.id).collect();
    let mut count: Vec<u32> = ids
        .iter()
        .map(|&id| modules.get(id).map(|m| m.dag.num_sources).unwrap_or(0))
        .collect();
    let mut order = Vec::with_capacity(ids.len());
    let mut done = vec![false; ids.len()];
    let mut remaining = ids.len();

    while remaining > 0 {
        let ready: Vec<usize> = (0..ids.len()).filter(|&i| !done[i] && count[i] == 0).collect();
        if ready.is_empty() {
            break; // cyclic graph; not expected to occur per spec invariants
        }
        for &i in &ready {
            done[i] = true;
            remaining -= 1;
            order.push(ids[i]);
            if let Some(m) = modules.get(ids[i]) {
                for &sink in &m.dag.sinks {
                    if let Some(j) = ids.iter().position(|&x| x == sink) {
                        if !done[j] {
                            count[j] = count[j].saturating_sub(1);
                        }
                    }
                }
            }
        }
    }

    // Any module left out by a break above (cyclic graph, not expected)
    // keeps its relative position, appended last by `reorder`.
    modules.reorder(&order);
}

/// `concurrency_width()` (§4.4): Kahn-style relaxation over the
/// current `dag_reorder` output. Returns the widest simultaneously
/// ready set observed across rounds.
pub fn concurrency_width(modules: &ModuleManager) -> u32 {
    let ids: Vec<ModuleId> = modules.iter().map(|m| m.id).collect();
    let mut count: Vec<u32> = ids
        .iter()
        .map(|&id| modules.get(id).map(|m| m.dag.num_sources).unwrap_or(0))
        .collect();
    let mut concurrent = 0u32;
    let mut remaining = ids.len();

    while remaining > 0 {
        let ready: Vec<usize> = count
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == 0)
            .map(|(i, _)| i)
            .collect();
        if ready.is_empty() {
            break; // cyclic graph; not expected to occur per spec invariants
        }
        concurrent = concurrent.max(ready.len() as u32);

        for &i in &ready {
            count[i] = u32::MAX; // mark processed, excluded from future rounds
            remaining -= 1;
            if let Some(m) = modules.get(ids[i]) {
                for &sink in &m.dag.sinks {
                    if let Some(j) = ids.iter().position(|&x| x == sink) {
                        if count[j] != u32::MAX {
                            count[j] = count[j].saturating_sub(1);
                        }
                    }
                }
            }
        }
    }

    concurrent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{DagNode, Module, ModuleUrn, Profile};
    use crate::port::{ControlPort, Port, PortPayload};
    use synthpod_plugin_api::{PluginAudioThread, PortBufferRef, PortDirection, PortType, ProcInfo, ProcessStatus};

    struct NoopAudioThread;
    impl PluginAudioThread for NoopAudioThread {
        fn process(&mut self, _info: &ProcInfo, _ports: &mut [PortBufferRef<'_>]) -> ProcessStatus {
            ProcessStatus::Continue
        }
    }

    fn audio_port(direction: PortDirection) -> Port {
        Port {
            symbol: "p".into(),
            name: "p".into(),
            direction,
            port_type: PortType::Audio,
            protocol: synthpod_plugin_api::Urid::NONE,
            subscriptions: 0,
            payload: PortPayload::Audio {
                buffer: vec![0.0; 64],
                last_peak: 0.0,
                connectable: Default::default(),
            },
        }
    }

    fn cv_port(direction: PortDirection) -> Port {
        Port {
            symbol: "p".into(),
            name: "p".into(),
            direction,
            port_type: PortType::Cv,
            protocol: synthpod_plugin_api::Urid::NONE,
            subscriptions: 0,
            payload: PortPayload::Cv {
                buffer: vec![0.0; 64],
                last_peak: 0.0,
                connectable: Default::default(),
            },
        }
    }

    fn control_port() -> Port {
        Port {
            symbol: "c".into(),
            name: "c".into(),
            direction: PortDirection::Input,
            port_type: PortType::Control,
            protocol: synthpod_plugin_api::Urid::NONE,
            subscriptions: 0,
            payload: PortPayload::Control(ControlPort::new(Default::default())),
        }
    }

    fn module(id: u32, ports: Vec<Port>) -> Module {
        Module {
            id: ModuleId(id),
            urn: ModuleUrn(id as u128),
            uri: format!("test:{id}"),
            audio_thread: Box::new(NoopAudioThread),
            ports,
            profile: Profile::default(),
            dag: DagNode::default(),
            position: Default::default(),
            disabled: false,
            delete_request: false,
            bypass: false,
            automations: Default::default(),
        }
    }

    fn addr(m: u32, p: u32) -> PortAddr {
        PortAddr {
            module: ModuleId(m),
            index: crate::port::PortIndex(p),
        }
    }

    #[test]
    fn connect_rejects_direction_and_type_mismatch() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(0, vec![audio_port(PortDirection::Output)])).unwrap();
        mgr.insert(module(1, vec![audio_port(PortDirection::Output), control_port()])).unwrap();

        // sink must be an input: module 0's port is an output.
        assert_eq!(
            connect(&mut mgr, addr(1, 1), addr(0, 0), 64),
            Err(ConnectError::DirectionMismatch)
        );
    }

    #[test]
    fn connect_twice_is_idempotent() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(0, vec![audio_port(PortDirection::Output)])).unwrap();
        mgr.insert(module(1, vec![audio_port(PortDirection::Input)])).unwrap();

        assert_eq!(connect(&mut mgr, addr(0, 0), addr(1, 0), 64), Ok(ConnectOutcome::Connected));
        assert_eq!(
            connect(&mut mgr, addr(0, 0), addr(1, 0), 64),
            Ok(ConnectOutcome::AlreadyConnected)
        );
    }

    /// §8 invariant 2: after connect, the source's `sinks` list names
    /// the sink module and the sink's `num_sources` is 1; after
    /// disconnect (a Cv edge, so it takes effect immediately) both
    /// revert to empty/0.
    #[test]
    fn dag_bookkeeping_tracks_a_single_edge_through_connect_and_disconnect() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(0, vec![cv_port(PortDirection::Output)])).unwrap();
        mgr.insert(module(1, vec![cv_port(PortDirection::Input)])).unwrap();

        connect(&mut mgr, addr(0, 0), addr(1, 0), 64).unwrap();
        assert_eq!(mgr.get(ModuleId(1)).unwrap().dag.num_sources, 1);
        assert!(mgr.get(ModuleId(0)).unwrap().dag.sinks.contains(&ModuleId(1)));

        disconnect(&mut mgr, addr(0, 0), addr(1, 0), 64).unwrap();
        assert_eq!(mgr.get(ModuleId(1)).unwrap().dag.num_sources, 0);
        assert!(!mgr.get(ModuleId(0)).unwrap().dag.sinks.contains(&ModuleId(1)));
    }

    /// Regression: a module feeding a successor through two separate
    /// connections must still unblock that successor exactly once the
    /// predecessor finishes — `num_sources` must count distinct
    /// predecessor modules, matching the de-duplicated `sinks` list.
    #[test]
    fn concurrency_width_survives_multiple_connections_between_the_same_pair() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(
            0,
            vec![audio_port(PortDirection::Output), audio_port(PortDirection::Output)],
        ))
        .unwrap();
        mgr.insert(module(
            1,
            vec![audio_port(PortDirection::Input), audio_port(PortDirection::Input)],
        ))
        .unwrap();

        connect(&mut mgr, addr(0, 0), addr(1, 0), 64).unwrap();
        connect(&mut mgr, addr(0, 1), addr(1, 1), 64).unwrap();

        assert_eq!(mgr.get(ModuleId(1)).unwrap().dag.num_sources, 1);
        assert_eq!(concurrency_width(&mgr), 1);
    }

    #[test]
    fn concurrency_width_reports_independent_chains_as_parallel() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(0, vec![audio_port(PortDirection::Output)])).unwrap();
        mgr.insert(module(1, vec![audio_port(PortDirection::Output)])).unwrap();
        mgr.insert(module(
            2,
            vec![audio_port(PortDirection::Input), audio_port(PortDirection::Input)],
        ))
        .unwrap();

        connect(&mut mgr, addr(0, 0), addr(2, 0), 64).unwrap();
        connect(&mut mgr, addr(1, 0), addr(2, 1), 64).unwrap();

        // modules 0 and 1 have no dependency on each other: width 2.
        assert_eq!(concurrency_width(&mgr), 2);
    }

    /// Regression: connecting a source to a sink that was *inserted*
    /// first must physically move the sink after the source, since
    /// `App::run_period` relies on vector order alone to know a
    /// predecessor has already run.
    #[test]
    fn connect_reorders_the_vector_when_sink_was_inserted_first() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(0, vec![audio_port(PortDirection::Input)])).unwrap(); // sink, inserted first
        mgr.insert(module(1, vec![audio_port(PortDirection::Output)])).unwrap(); // source, inserted second

        connect(&mut mgr, addr(1, 0), addr(0, 0), 64).unwrap();

        let order: Vec<ModuleId> = mgr.as_slice().iter().map(|m| m.id).collect();
        let source_pos = order.iter().position(|&id| id == ModuleId(1)).unwrap();
        let sink_pos = order.iter().position(|&id| id == ModuleId(0)).unwrap();
        assert!(source_pos < sink_pos, "order: {:?}", order);
    }

    #[test]
    fn disconnect_of_audio_sink_defers_to_ramp_down() {
        let mut mgr = ModuleManager::new();
        mgr.insert(module(0, vec![audio_port(PortDirection::Output)])).unwrap();
        mgr.insert(module(1, vec![audio_port(PortDirection::Input)])).unwrap();
        connect(&mut mgr, addr(0, 0), addr(1, 0), 64).unwrap();

        assert_eq!(
            disconnect(&mut mgr, addr(0, 0), addr(1, 0), 64),
            Ok(ConnectOutcome::DeferredToRampDown)
        );
        // still present until the ramp completes and `drain_completed_ramps` runs.
        let port = &mgr.get(ModuleId(1)).unwrap().ports[0];
        assert!(port.connectable().unwrap().contains(addr(0, 0)));
    }
}
