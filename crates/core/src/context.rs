use tokio_util::sync::CancellationToken;

pub const DEFAULT_SCHED_PRIORITY: i32 = 0;

/// Per-request context: a cancellation signal plus the scheduling priority
/// the request should be queued with (larger = more urgent).
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    priority: i32,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            priority: DEFAULT_SCHED_PRIORITY,
        }
    }

    /// Wrap an existing token, e.g. one owned by the sector lifecycle layer.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            priority: DEFAULT_SCHED_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A context cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            priority: self.priority,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
