use std::sync::Arc;
use tokio::sync::Notify;

/// Re-arms an idle worker.
///
/// A notification sent while nobody is waiting is latched and consumed by the
/// next wait, so a wake that races with a worker finishing its pass is never
/// lost. Several notifications before a wait collapse into one.
#[derive(Clone, Default)]
pub struct WakeSignal {
    notify: Arc<Notify>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Completes once a notification is available.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WakeSignal")
    }
}
