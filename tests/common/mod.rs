//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestEnv;
//!
//! #[test]
//! fn test_empty_store() {
//!     let env = TestEnv::new();
//!     assert!(env.pending_crawls().is_empty());
//! }
//! ```

mod constants;
mod fakes;
mod fixtures;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fakes::{ArchivingExecutor, RecordingIndexer, WarcWritingExecutor};
#[allow(unused_imports)]
pub use fixtures::{wait_until, TestEnv};
