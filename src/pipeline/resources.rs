//! Resource cleanup registry: a single place every subsystem that owns something that must be
//! torn down (an IRR tunnel, an open database handle) registers a closure, so both the normal
//! exit path and the signal handler in `src/bin/otto-bgp.rs` run the same teardown code.
//!
//! Modeled on a supervisor shutdown path, which drives
//! every owned subsystem's stop sequence from one place rather than scattering `Drop` impls.

use std::sync::Mutex;

pub struct ResourceRegistry {
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self { cleanups: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.lock().unwrap().push(Box::new(cleanup));
    }

    /// Runs every registered cleanup in reverse registration order (most-recently-acquired
    /// resource torn down first) and clears the registry. Safe to call more than once; a second
    /// call is a no-op.
    pub fn run_all(&self) {
        let mut cleanups = self.cleanups.lock().unwrap();
        while let Some(cleanup) = cleanups.pop() {
            cleanup();
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
