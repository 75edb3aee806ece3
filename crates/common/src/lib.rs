//! privprobe common library
//!
//! Shared types, process supervision and persistence for the privprobe
//! test-run orchestrator.

pub mod error;
pub mod failures;
pub mod ledger;
pub mod process;
pub mod timing;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result, SerializedError};
pub use failures::{FailureRepository, FsFailureStore};
pub use ledger::{RunLedger, SqliteLedger};
pub use process::{ProcessHandle, ProcessSupervisor};
pub use timing::PollPolicy;
pub use types::*;

/// privprobe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
