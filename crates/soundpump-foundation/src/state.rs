use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of a streaming session.
///
/// The only legal walk is `Deinitialized -> Initialized -> Running ->
/// Initialized -> Deinitialized`; the gates below make any other order
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Deinitialized,
    Initialized,
    Running,
}

/// Compare-and-set lifecycle gates shared between caller threads and the
/// pump thread.
///
/// Arbitrary threads may race on `begin_init`/`begin_run`; exactly one wins
/// each and performs the transition work, the rest observe a no-op. The
/// derived [`EngineState`] is what callers query.
#[derive(Debug, Default)]
pub struct StateGate {
    initialized: AtomicBool,
    running: AtomicBool,
}

impl StateGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EngineState {
        if self.running.load(Ordering::SeqCst) {
            EngineState::Running
        } else if self.initialized.load(Ordering::SeqCst) {
            EngineState::Initialized
        } else {
            EngineState::Deinitialized
        }
    }

    /// Claims the deinitialized -> initialized transition. Returns `true`
    /// for the single caller that must now perform initialization.
    pub fn begin_init(&self) -> bool {
        let won = !self.initialized.swap(true, Ordering::SeqCst);
        if won {
            tracing::debug!("state gate: begin initialize");
        }
        won
    }

    /// Reverts a failed initialization claimed via [`begin_init`](Self::begin_init).
    pub fn abort_init(&self) {
        tracing::debug!("state gate: initialize aborted");
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// Claims the initialized -> deinitialized transition. Returns `true`
    /// for the single caller that must now tear the session down.
    pub fn begin_deinit(&self) -> bool {
        let won = self.initialized.swap(false, Ordering::SeqCst);
        if won {
            tracing::debug!("state gate: begin deinitialize");
        }
        won
    }

    /// Claims the -> running transition. Returns `true` for the single
    /// caller that must now spawn the pump.
    pub fn begin_run(&self) -> bool {
        let won = !self.running.swap(true, Ordering::SeqCst);
        if won {
            tracing::debug!("state gate: begin run");
        }
        won
    }

    /// Clears the running flag. Safe to call from any exit path, including
    /// the pump thread itself.
    pub fn end_run(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("state gate: run ended");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_deinitialized() {
        let gate = StateGate::new();
        assert_eq!(gate.state(), EngineState::Deinitialized);
    }

    #[test]
    fn only_one_caller_wins_init() {
        let gate = StateGate::new();
        assert!(gate.begin_init());
        assert!(!gate.begin_init());
        assert_eq!(gate.state(), EngineState::Initialized);
    }

    #[test]
    fn aborted_init_reverts_state() {
        let gate = StateGate::new();
        assert!(gate.begin_init());
        gate.abort_init();
        assert_eq!(gate.state(), EngineState::Deinitialized);
        assert!(gate.begin_init());
    }

    #[test]
    fn running_dominates_derived_state() {
        let gate = StateGate::new();
        gate.begin_init();
        gate.begin_run();
        assert_eq!(gate.state(), EngineState::Running);
        gate.end_run();
        assert_eq!(gate.state(), EngineState::Initialized);
    }

    #[test]
    fn deinit_noop_when_never_initialized() {
        let gate = StateGate::new();
        assert!(!gate.begin_deinit());
    }

    #[test]
    fn concurrent_begin_run_has_single_winner() {
        use std::sync::Arc;

        let gate = Arc::new(StateGate::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(std::thread::spawn(move || gate.begin_run()));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
