//! Application context shared by the scheduler and the health route.
//!
//! Built once in `main.rs`; there are no process-wide singletons.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::store::Store;
use crate::Config;

// ---

#[derive(Clone)]
pub struct AppContext {
    // ---
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    scheduler_running: Arc<AtomicBool>,
}

impl AppContext {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            scheduler_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_scheduler_running(&self, running: bool) {
        self.scheduler_running.store(running, Ordering::SeqCst);
    }
}
