//! `action-exec` — runs the external command behind an action, once per
//! queued work item.
//!
//! # Architecture
//!
//! ```text
//! run(command, input, cancel)
//!     │
//!     ▼
//! ActionProcess   ← spawns `program arg…` (whitespace split, no shell)
//!     │              writes the item JSON as one stdin line, closes stdin
//!     │              logs stdout lines, buffers stderr
//!     ▼
//! ExecOutput | ExecError (Exit / Signal carry stderr; Cancelled kills)
//! ```

pub mod error;
pub mod runner;

pub(crate) mod process;

pub use error::ExecError;
pub use runner::{run, ExecOutput};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ExecError>;
