//! # Stata Session
//!
//! Drives a long-lived Stata interpreter one statement at a time.
//!
//! ```text
//! ChunkPlan ──> Dispatcher ──> CommandLog (fingerprint, text, excluded text)
//!                  │
//!                  ├──> ExternalProcess::send(statement)   one in flight
//!                  │        └─> ConsoleProcess (stdin/stdout of `stata -q`)
//!                  │
//!                  └──> DispatchResult { status, per-statement outcomes, events }
//! ```
//!
//! A failing statement halts the rest of the plan unless
//! [`ErrorPolicy::ContinueOnError`] is configured. A process that stops
//! answering is reported as [`DispatchStatus::Fatal`], never as a statement
//! error.

pub mod command_log;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod process;

pub use command_log::{CommandLog, FileCommandLog, LogEntry};
pub use config::{DispatchConfig, ErrorPolicy};
pub use console::ConsoleProcess;
pub use dispatcher::{
    DispatchResult, DispatchStatus, Dispatcher, NullSink, OutputSink, StatementOutcome,
    StatementReport, FATAL_RETURN_CODE,
};
pub use error::{ProcessError, Result, SessionError};
pub use process::{ExternalProcess, ProcessResponse, SideChannelEvent};
