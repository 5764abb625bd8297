use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "is the bookmark service reachable" flag.
///
/// The engine reads it before every network leg; the daemon's probe loop and
/// failed requests write it.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Stores the new state and reports whether this call brought the link back up.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        online && !was_online
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
