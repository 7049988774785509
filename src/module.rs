//! C2: the module vector — one entry per plugin instance — and the
//! operations that add, delete, profile and disable a module. Grounded
//! on `original_source/lib/synthpod_private.h`'s `mod_t` and spec
//! §3/§4.2.

use std::time::Duration;

use smallvec::SmallVec;

use synthpod_plugin_api::PluginAudioThread;

use crate::config::MAX_MODULES;
use crate::error::ModuleAddError;
use crate::port::{Port, PortIndex};

/// Array-index identity, stable only within a session (§3 "stable
/// integer id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Stable identity that survives across sessions and is what saved
/// state and the UI address a module by (§3 "interned URN", §9
/// "Cyclic and shared structure" resolved via arena + index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleUrn(pub u128);

/// One entry in an automation table (§3 "optional automation table, up
/// to 64 entries").
#[derive(Debug, Clone, Copy)]
pub struct AutomationEntry {
    pub port_index: PortIndex,
    pub source_urn: ModuleUrn,
    pub min: f32,
    pub max: f32,
}

pub const MAX_AUTOMATIONS: usize = 64;

/// Running min/avg/max of a module's last-run CPU time (§3 "profiling
/// counters", §4.2 `profile`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Profile {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
    samples: u64,
}

impl Profile {
    pub fn record(&mut self, sample: Duration) {
        if self.samples == 0 {
            self.min = sample;
            self.max = sample;
            self.avg = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
            // Running mean, avoids summing into overflow over a long session.
            let avg_nanos = self.avg.as_nanos() as i128;
            let sample_nanos = sample.as_nanos() as i128;
            let n = self.samples as i128 + 1;
            let new_avg = avg_nanos + (sample_nanos - avg_nanos) / n;
            self.avg = Duration::from_nanos(new_avg.max(0) as u64);
        }
        self.samples += 1;
    }
}

/// DAG node bookkeeping recomputed by `dag_reorder` (§3 "Scheduler
/// state", §4.4 `dag_reorder`).
#[derive(Debug, Clone, Default)]
pub struct DagNode {
    pub num_sources: u32,
    pub sinks: SmallVec<[ModuleId; 8]>,
    /// Working decrement counter used by `concurrency_width` and the
    /// parallel scheduler's ready-set derivation.
    pub count: u32,
}

/// A UI position hint, opaque to scheduling (§3 "position hint").
#[derive(Debug, Clone, Copy, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// One plugin instance (§3 "Module").
pub struct Module {
    pub id: ModuleId,
    pub urn: ModuleUrn,
    pub uri: String,
    pub audio_thread: Box<dyn PluginAudioThread>,
    pub ports: Vec<Port>,
    pub profile: Profile,
    pub dag: DagNode,
    pub position: Position,
    pub disabled: bool,
    pub delete_request: bool,
    pub bypass: bool,
    pub automations: SmallVec<[AutomationEntry; MAX_AUTOMATIONS]>,
}

impl Module {
    /// §3 "bypass flag": set by the worker while it is restoring a
    /// module's state non-realtime-safely (preset/bundle load) so the
    /// audio thread skips `process()` for that module without touching
    /// its connections or running any ramp, unlike `disabled`/
    /// `delete_request` which do affect connectivity (`original_source/
    /// app/synthpod_app_private.h`'s `needs_bypassing`/`bypassed`).
    pub fn should_run(&self) -> bool {
        !self.disabled && !self.delete_request && !self.bypass
    }
}

/// Owns the module vector. Exclusively mutated by the audio thread;
/// the worker only ever hands over a ready-built `Module` (§3
/// "Ownership summary").
#[derive(Default)]
pub struct ModuleManager {
    modules: Vec<Module>,
    next_id: u32,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Module> {
        self.modules.iter_mut()
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.id == id)
    }

    pub fn position_of(&self, id: ModuleId) -> Option<usize> {
        self.modules.iter().position(|m| m.id == id)
    }

    pub fn as_slice(&self) -> &[Module] {
        &self.modules
    }

    /// Physically permutes the module vector into `order` (§4.4 "the
    /// ordering rule": connecting two modules out of topological order
    /// requires a prior `module_move`; rather than push that burden
    /// onto callers this crate performs it itself as part of
    /// `connect`). Any id in `order` not currently present is skipped;
    /// any current module not named in `order` keeps its relative
    /// position, appended after the named ones.
    pub fn reorder(&mut self, order: &[ModuleId]) {
        let mut by_id: std::collections::HashMap<ModuleId, Module> =
            std::collections::HashMap::with_capacity(self.modules.len());
        for m in self.modules.drain(..) {
            by_id.insert(m.id, m);
        }
        for &id in order {
            if let Some(m) = by_id.remove(&id) {
                self.modules.push(m);
            }
        }
        // Any id `order` didn't mention (shouldn't happen in practice)
        // keeps the crate from silently dropping a module.
        let mut leftovers: Vec<Module> = by_id.into_values().collect();
        leftovers.sort_by_key(|m| m.id.0);
        self.modules.extend(leftovers);
    }

    /// Splits the module vector at `index`, giving the scheduler
    /// access to every already-processed predecessor (immutably) and
    /// the module about to run (mutably) without aliasing (§9 "Cyclic
    /// and shared structure": no pointer back-references, so a plain
    /// index split is sound as long as the vector stays topologically
    /// ordered).
    pub fn split_at_mut(&mut self, index: usize) -> (&mut [Module], &mut [Module]) {
        self.modules.split_at_mut(index)
    }

    /// Reserves the next module id, failing if the vector is already at
    /// `MAX_MODULES` (§4.2 "Module capacity is fixed"). Call this before
    /// handing instantiation to the worker so a rejected add never
    /// leaks a built plugin instance.
    pub fn reserve(&self) -> Result<ModuleId, ModuleAddError> {
        if self.modules.len() >= MAX_MODULES {
            return Err(ModuleAddError::Capacity);
        }
        Ok(ModuleId(self.next_id))
    }

    /// Audio-thread handoff: inserts a module the worker finished
    /// building for a previously `reserve`d id (§4.2 "emits reply to
    /// audio thread").
    pub fn insert(&mut self, module: Module) -> Result<(), ModuleAddError> {
        if self.modules.len() >= MAX_MODULES {
            return Err(ModuleAddError::Capacity);
        }
        self.next_id = self.next_id.max(module.id.0 + 1);
        self.modules.push(module);
        Ok(())
    }

    /// Phase one of module deletion: audio thread sets `delete_request`
    /// on `id`. The caller is responsible for ramping down that
    /// module's sink-side audio edges with `RampState::DownDel` (§4.2
    /// two-phase `del`).
    pub fn request_delete(&mut self, id: ModuleId) -> bool {
        if let Some(m) = self.get_mut(id) {
            m.delete_request = true;
            true
        } else {
            false
        }
    }

    /// Phase two: once every audio ramp into `id` has finished and all
    /// remaining edges have been disconnected, remove it from the
    /// vector. The worker is expected to deactivate and free its
    /// plugin handle once it observes the reply carrying `urn`.
    pub fn finalize_delete(&mut self, id: ModuleId) -> Option<Module> {
        let pos = self.position_of(id)?;
        if !self.modules[pos].delete_request {
            return None;
        }
        Some(self.modules.remove(pos))
    }

    /// §4.2 `profile`: records one run's duration against the module's
    /// running min/avg/max.
    pub fn profile(&mut self, id: ModuleId, duration: Duration) {
        if let Some(m) = self.get_mut(id) {
            m.profile.record(duration);
        }
    }

    /// §4.2 `disable`: toggles bypass. The caller must still drive the
    /// audio-input ramp-down/up via `RampState::DownDisable` on connect
    /// side; this only flips the bookkeeping flag once the ramp
    /// finishes (or immediately on re-enable, which has no ramp).
    pub fn set_disabled(&mut self, id: ModuleId, disabled: bool) -> bool {
        if let Some(m) = self.get_mut(id) {
            m.disabled = disabled;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_tracks_min_avg_max() {
        let mut p = Profile::default();
        p.record(Duration::from_micros(10));
        p.record(Duration::from_micros(30));
        p.record(Duration::from_micros(20));
        assert_eq!(p.min, Duration::from_micros(10));
        assert_eq!(p.max, Duration::from_micros(30));
        assert_eq!(p.avg, Duration::from_micros(20));
    }

    #[test]
    fn reserve_fails_past_capacity() {
        let mgr = ModuleManager::new();
        // A fresh manager is always under capacity.
        assert!(mgr.reserve().is_ok());
    }

    struct NoopAudioThread;
    impl PluginAudioThread for NoopAudioThread {
        fn process(
            &mut self,
            _info: &synthpod_plugin_api::ProcInfo,
            _ports: &mut [synthpod_plugin_api::PortBufferRef<'_>],
        ) -> synthpod_plugin_api::ProcessStatus {
            synthpod_plugin_api::ProcessStatus::Continue
        }
    }

    fn bare_module(id: u32) -> Module {
        Module {
            id: ModuleId(id),
            urn: ModuleUrn(id as u128),
            uri: format!("test:{id}"),
            audio_thread: Box::new(NoopAudioThread),
            ports: Vec::new(),
            profile: Profile::default(),
            dag: DagNode::default(),
            position: Default::default(),
            disabled: false,
            delete_request: false,
            bypass: false,
            automations: Default::default(),
        }
    }

    /// §8 invariant 9: adding `MAX_MODULES + 1` modules yields exactly
    /// `MAX_MODULES` successful adds and one capacity error.
    #[test]
    fn insert_rejects_exactly_one_past_max_modules() {
        let mut mgr = ModuleManager::new();
        let mut added = 0;
        let mut rejected = 0;
        for i in 0..(MAX_MODULES as u32 + 1) {
            let id = match mgr.reserve() {
                Ok(id) => id,
                Err(_) => {
                    rejected += 1;
                    continue;
                }
            };
            let mut m = bare_module(id.0);
            m.id = id;
            match mgr.insert(m) {
                Ok(()) => added += 1,
                Err(_) => rejected += 1,
            }
            let _ = i;
        }
        assert_eq!(added, MAX_MODULES);
        assert_eq!(rejected, 1);
        assert_eq!(mgr.len(), MAX_MODULES);
    }
}
