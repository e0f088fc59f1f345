//! Shared test constants

#![allow(dead_code)]

use std::time::Duration;

/// Warcs written by [`WarcWritingExecutor`](super::WarcWritingExecutor) per crawl
pub const WARCS_PER_CRAWL: usize = 3;

/// Upper bound for background workers to reach an expected state
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback poll far beyond any test, so progress must come from wake signals
pub const NEVER_POLL: Duration = Duration::from_secs(3600);

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
