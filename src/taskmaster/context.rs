use tokio_util::sync::CancellationToken;

/// Context handed to a worker for each pass.
#[derive(Clone)]
pub struct WorkerContext {
    /// Token to check for shutdown requests.
    pub cancellation_token: CancellationToken,
}

impl WorkerContext {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self { cancellation_token }
    }

    /// Check if shutdown has been requested.
    ///
    /// Workers check this between units of work, never in the middle of one,
    /// and return early once it is set.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
