use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::observability::MetricsState;

/// Shared state of the health and metrics handlers.
#[derive(Clone, Default)]
pub struct AppState {
    pub readiness: Arc<AtomicBool>,
    pub metrics_state: Option<MetricsState>,
}

impl AppState {
    pub fn new(metrics_state: Option<MetricsState>) -> Self {
        Self {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics_state,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.readiness.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.load(Ordering::Acquire)
    }
}
