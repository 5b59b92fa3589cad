//! One-shot readiness latch for engine initialization.

use std::sync::{Arc, Condvar, Mutex};

struct GateState {
    settled: Option<Result<(), String>>,
}

/// Settled exactly once with the outcome of engine initialization. Every
/// waiter, before or after settlement, observes that same outcome; a load
/// failure is sticky and is never retried.
pub struct ReadyGate {
    state: Mutex<GateState>,
    settled_cv: Condvar,
}

impl ReadyGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState { settled: None }),
            settled_cv: Condvar::new(),
        })
    }

    /// First settlement wins; later calls are ignored.
    pub fn settle(&self, outcome: Result<(), String>) {
        let mut state = self.state.lock().unwrap();
        if state.settled.is_none() {
            state.settled = Some(outcome);
            self.settled_cv.notify_all();
        }
    }

    /// Blocks until settled.
    pub fn wait(&self) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        while state.settled.is_none() {
            state = self.settled_cv.wait(state).unwrap();
        }
        state.settled.clone().unwrap()
    }

    /// Non-blocking peek, for callers that only want to observe.
    pub fn try_wait(&self) -> Option<Result<(), String>> {
        self.state.lock().unwrap().settled.clone()
    }
}
