//! Single-flight session gate with cooperative cancellation.
//!
//! ## Why a gate object instead of a global flag?
//!
//! The gate is constructed once at process start and handed to every entry
//! point as a cloneable handle. Tests build their own gate; nothing reaches
//! for ambient state.
//!
//! ## Semantics
//!
//! * At most one run is active at any instant. [`SessionGate::try_start`]
//!   never blocks or queues: the loser of a race gets `false` immediately.
//! * [`SessionGate::request_cancel`] only sets a flag. The engine polls it
//!   between stages through a [`CancelToken`], so cancellation latency is the
//!   remaining duration of the current stage.
//! * [`SessionGuard`] releases the slot on drop, so the release happens on
//!   every exit path of a run including panics and early returns.
//!
//! Every operation is a short critical section over one `Mutex`; nothing
//! inside the lock performs I/O.

use crate::error::PipelineError;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct GateState {
    active: Option<String>,
    cancelled: HashSet<String>,
}

/// Process-wide admission and cancellation primitive. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionGate {
    inner: Arc<Mutex<GateState>>,
}

impl fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGate")
            .field("active", &self.active_run())
            .finish()
    }
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    // The state is updated in single assignments, so a panic while holding
    // the lock cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `id` as the sole active run iff no run is active.
    ///
    /// A stale cancel flag for `id` from an earlier run is cleared.
    pub fn try_start(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.active.is_some() {
            return false;
        }
        state.cancelled.remove(id);
        state.active = Some(id.to_string());
        debug!("Session gate: admitted '{}'", id);
        true
    }

    /// Release the slot iff `id` holds it. Safe to call redundantly.
    pub fn end(&self, id: &str) {
        let mut state = self.lock();
        if state.active.as_deref() == Some(id) {
            state.active = None;
            debug!("Session gate: released '{}'", id);
        }
        state.cancelled.remove(id);
    }

    /// Flag the active run `id` for cancellation.
    ///
    /// Returns `false` and records nothing when `id` is not the active run.
    pub fn request_cancel(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.active.as_deref() != Some(id) {
            return false;
        }
        state.cancelled.insert(id.to_string());
        info!("Cancellation requested for '{}'", id);
        true
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.lock().cancelled.contains(id)
    }

    pub fn active_run(&self) -> Option<String> {
        self.lock().active.clone()
    }

    /// [`try_start`](Self::try_start) returning a guard that ends the run on drop.
    pub fn admit(&self, id: &str) -> Result<SessionGuard, PipelineError> {
        if self.try_start(id) {
            Ok(SessionGuard {
                gate: self.clone(),
                session_id: id.to_string(),
            })
        } else {
            Err(PipelineError::AdmissionRejected {
                requested: id.to_string(),
                active: self.active_run().unwrap_or_default(),
            })
        }
    }
}

/// Scoped ownership of the gate slot. Dropping it calls [`SessionGate::end`].
#[derive(Debug)]
pub struct SessionGuard {
    gate: SessionGate,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token the engine polls between stages.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            gate: self.gate.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.gate.end(&self.session_id);
    }
}

/// Read-only view of one run's cancel flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    gate: SessionGate,
    session_id: String,
}

impl CancelToken {
    /// A token bound to a private gate; it is never cancelled.
    pub fn never(session_id: impl Into<String>) -> Self {
        Self {
            gate: SessionGate::new(),
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled(&self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn only_one_run_is_admitted() {
        let gate = SessionGate::new();
        assert!(gate.try_start("a"));
        assert!(!gate.try_start("b"));
        assert!(!gate.try_start("a"));
        assert_eq!(gate.active_run().as_deref(), Some("a"));

        gate.end("a");
        assert!(gate.active_run().is_none());
        assert!(gate.try_start("b"));
    }

    #[test]
    fn concurrent_try_start_admits_exactly_one() {
        let gate = SessionGate::new();
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let gate = gate.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gate.try_start(&format!("run-{i}"))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);

        let winner = gate.active_run().unwrap();
        gate.end(&winner);
        assert!(gate.try_start("late"));
    }

    #[test]
    fn end_by_non_holder_is_ignored() {
        let gate = SessionGate::new();
        gate.try_start("a");
        gate.end("b");
        assert_eq!(gate.active_run().as_deref(), Some("a"));
        gate.end("a");
        gate.end("a");
        assert!(gate.active_run().is_none());
    }

    #[test]
    fn cancel_only_applies_to_active_run() {
        let gate = SessionGate::new();
        assert!(!gate.request_cancel("a"));
        assert!(!gate.is_cancelled("a"));

        gate.try_start("a");
        assert!(!gate.request_cancel("b"));
        assert!(!gate.is_cancelled("b"));

        assert!(gate.request_cancel("a"));
        assert!(gate.is_cancelled("a"));
        assert!(gate.request_cancel("a"));
        assert!(gate.is_cancelled("a"), "cancel flag is monotone");

        gate.end("a");
        assert!(!gate.is_cancelled("a"));
    }

    #[test]
    fn guard_releases_on_drop_and_token_observes_cancel() {
        let gate = SessionGate::new();
        {
            let guard = gate.admit("a").unwrap();
            let token = guard.token();
            assert!(!token.is_cancelled());
            gate.request_cancel("a");
            assert!(token.is_cancelled());

            let err = gate.admit("b").unwrap_err();
            assert!(matches!(
                err,
                PipelineError::AdmissionRejected { ref active, .. } if active == "a"
            ));
        }
        assert!(gate.active_run().is_none());
        assert!(gate.admit("b").is_ok());
    }

    #[test]
    fn guard_releases_on_panic() {
        let gate = SessionGate::new();
        let g = gate.clone();
        let result = thread::spawn(move || {
            let _guard = g.admit("a").unwrap();
            panic!("stage blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(gate.active_run().is_none());
    }

    #[test]
    fn never_token_is_not_cancelled() {
        let token = CancelToken::never("x");
        assert!(!token.is_cancelled());
        assert_eq!(token.session_id(), "x");
    }
}
