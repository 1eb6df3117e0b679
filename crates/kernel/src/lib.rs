//! # Stata Kernel
//!
//! Notebook-facing orchestration around the chunker and the session:
//!
//! ```text
//! execute(text)
//!   ├─> MagicRegistry::intercept ──> Intercepted: reply, done
//!   ├─> Chunker (current delimiter mode) ──> incomplete: error
//!   ├─> ChunkPlanner ──> ChunkPlan
//!   ├─> Dispatcher ──> Frontend (stream text, graphs)
//!   ├─> persist ending mode, "delimiter now ..." when it changed
//!   └─> CompletionState::refresh on success
//! ```
//!
//! After a fatal dispatch the session is dead and every later `execute`
//! fails immediately.

pub mod completions;
pub mod config;
pub mod error;
pub mod frontend;
pub mod kernel;
pub mod magics;

pub use completions::{CompletionEnv, CompletionRequest, CompletionState};
pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use frontend::{Frontend, RecordingFrontend, StdoutFrontend};
pub use kernel::{Kernel, SubmissionState};
pub use magics::{
    Interception, Magic, MagicContext, MagicInvocation, MagicRegistry, MagicResponse, PostAction,
};
