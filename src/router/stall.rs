//! The router's blocking state machine, audio-thread side (§4.7
//! "Blocking state machine"). Modeled as an explicit enum with a
//! transition table per §9 "Coroutine-like state machines", rather
//! than callbacks.

/// One of the four states the router can be in. Determines whether UI
/// input is passed through to plugins this period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallState {
    Run,
    Drain,
    Block,
    Wait,
}

impl StallState {
    /// Whether UI-ring reads should be advanced (consumed) this period.
    pub fn advance_ui(self) -> bool {
        matches!(self, StallState::Run | StallState::Block)
    }

    /// Whether worker-ring reads should be advanced; always true (§4.7
    /// "advance_work[]: all T").
    pub fn advance_work(self) -> bool {
        true
    }
}

/// Drives the `RUN -> DRAIN -> BLOCK -> WAIT -> RUN` cycle plus a
/// bounded timeout auto-release so a lost worker reply can never
/// deadlock the audio thread (§9 open question, resolved in
/// `SPEC_FULL.md`: added since the spec's DRAIN state has no documented
/// escape if the worker reply never arrives).
pub struct StallMachine {
    state: StallState,
    drain_periods_elapsed: u32,
    timeout_periods: u32,
}

impl StallMachine {
    pub fn new(timeout_periods: u32) -> Self {
        Self {
            state: StallState::Run,
            drain_periods_elapsed: 0,
            timeout_periods,
        }
    }

    pub fn state(&self) -> StallState {
        self.state
    }

    /// A worker-originating "will-restore-state" request arrived
    /// (§4.7 "On any worker-originating... enter DRAIN").
    pub fn begin_drain(&mut self) {
        if self.state == StallState::Run {
            self.state = StallState::Drain;
            self.drain_periods_elapsed = 0;
        }
    }

    /// The worker acknowledged that draining is complete.
    pub fn drain_acknowledged(&mut self) {
        if self.state == StallState::Drain {
            self.state = StallState::Block;
        }
    }

    /// The worker posted the restored state; transition to `WAIT`
    /// until the audio thread finishes desilencing outputs.
    pub fn state_posted(&mut self) {
        if self.state == StallState::Block {
            self.state = StallState::Wait;
        }
    }

    /// The audio thread has desilenced every output; `WAIT -> RUN`.
    pub fn desilenced(&mut self) {
        if self.state == StallState::Wait {
            self.state = StallState::Run;
        }
    }

    /// Advances per-period bookkeeping; call once per audio period.
    /// Auto-releases a `DRAIN` that has sat unacknowledged for longer
    /// than `timeout_periods`, so a lost worker reply cannot wedge the
    /// UI ring shut forever.
    pub fn tick(&mut self) {
        if self.state == StallState::Drain {
            self.drain_periods_elapsed += 1;
            if self.drain_periods_elapsed >= self.timeout_periods {
                self.state = StallState::Run;
                self.drain_periods_elapsed = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_returns_to_run() {
        let mut m = StallMachine::new(1000);
        assert_eq!(m.state(), StallState::Run);
        m.begin_drain();
        assert_eq!(m.state(), StallState::Drain);
        assert!(!m.state().advance_ui());
        m.drain_acknowledged();
        assert_eq!(m.state(), StallState::Block);
        assert!(m.state().advance_ui());
        m.state_posted();
        assert_eq!(m.state(), StallState::Wait);
        assert!(!m.state().advance_ui());
        m.desilenced();
        assert_eq!(m.state(), StallState::Run);
    }

    #[test]
    fn drain_auto_releases_after_timeout() {
        let mut m = StallMachine::new(3);
        m.begin_drain();
        m.tick();
        m.tick();
        assert_eq!(m.state(), StallState::Drain);
        m.tick();
        assert_eq!(m.state(), StallState::Run);
    }

    #[test]
    fn work_ring_always_advances() {
        for state in [StallState::Run, StallState::Drain, StallState::Block, StallState::Wait] {
            assert!(state.advance_work());
        }
    }
}
