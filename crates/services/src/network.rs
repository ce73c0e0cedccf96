//! Online/offline signal supplied by the host environment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
}

/// A flag the host flips when connectivity changes. Clones share the flag.
#[derive(Debug, Clone)]
pub struct NetworkSwitch {
    online: Arc<AtomicBool>,
}

impl NetworkSwitch {
    #[must_use]
    pub fn online() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for NetworkSwitch {
    fn default() -> Self {
        Self::online()
    }
}

impl NetworkStatus for NetworkSwitch {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_the_same_flag() {
        let switch = NetworkSwitch::online();
        let observer = switch.clone();
        switch.set_online(false);
        assert!(!observer.is_online());
    }
}
