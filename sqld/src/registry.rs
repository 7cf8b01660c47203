//! Connection registry: maps connection id to its cancellation flag, so a
//! `KILL QUERY`/`KILL CONNECTION` issued on one connection can signal
//! another's in-flight statement — the flag an executing statement polls
//! for is the same `AtomicBool` [`sql::executor::ExecContext::cancel`]
//! checks at each operator's `next()` boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct Registry {
    connections: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&self, id: u64, cancel: Arc<AtomicBool>) {
        self.connections.lock().unwrap().insert(id, cancel);
    }

    pub fn remove(&self, id: u64) {
        self.connections.lock().unwrap().remove(&id);
    }

    /// Flips the named connection's cancellation flag. `KILL QUERY` and
    /// `KILL CONNECTION` are the same signal at this layer — distinguishing
    /// "cancel the statement" from "also close the socket" is a concern of
    /// the network front end this crate doesn't implement.
    pub fn kill(&self, id: u64) -> bool {
        match self.connections.lock().unwrap().get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_flips_the_registered_flag() {
        let registry = Registry::new();
        let flag = Arc::new(AtomicBool::new(false));
        registry.register(1, flag.clone());
        assert!(registry.kill(1));
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn kill_of_unknown_connection_reports_failure() {
        let registry = Registry::new();
        assert!(!registry.kill(42));
    }

    #[test]
    fn removed_connection_can_no_longer_be_killed() {
        let registry = Registry::new();
        registry.register(1, Arc::new(AtomicBool::new(false)));
        registry.remove(1);
        assert!(!registry.kill(1));
    }
}
