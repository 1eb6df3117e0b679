//! # Stata Code Chunker
//!
//! Splits notebook cells of Stata source into logical statements and plans
//! what is sent to the interpreter.
//!
//! ## Philosophy
//!
//! A cell is only run when it is structurally complete. The chunker never
//! guesses: it reports the first thing that keeps a submission open
//! (an unclosed brace, a dangling `///`, an open `/*` comment or a
//! `program` block without `end`) and leaves the decision to the caller.
//!
//! ## Architecture
//!
//! ```text
//! SourceSubmission (text + delimiter mode)
//!     │
//!     ├──> Chunker
//!     │    ├─> Comment stripping, `///` joining
//!     │    ├─> `#delimit` switches (cr ↔ ;)
//!     │    ├─> Brace depth and verbatim text blocks
//!     │    └─> ChunkOutput { statements, excluded, ending_mode, completeness }
//!     │
//!     └──> ChunkPlanner
//!          ├─> SHA-256 fingerprint of the executable text
//!          ├─> Echo/Silent visibility per statement
//!          └─> ChunkPlan
//! ```
//!
//! ## Example
//!
//! ```rust
//! use stata_code_chunker::{ChunkPlanner, Chunker, DelimiterMode};
//!
//! let chunker = Chunker::default();
//! let output = chunker
//!     .chunk_str("sysuse auto\n#delimit ;\nregress price\n  mpg;", DelimiterMode::Newline)
//!     .unwrap();
//! assert!(output.completeness.is_complete());
//!
//! let plan = ChunkPlanner::default()
//!     .plan(output, DelimiterMode::Newline)
//!     .unwrap();
//! assert_eq!(plan.executable_count(), 2);
//! assert_eq!(plan.ending_mode, DelimiterMode::Semicolon);
//! ```

mod chunker;
mod config;
mod error;
mod planner;
pub mod syntax;
mod types;

pub use chunker::{is_complete, Chunker};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use planner::{ChunkPlan, ChunkPlanner, Fingerprint, PlannedStatement, Visibility};
pub use types::{
    Blocker, ChunkOutput, Completeness, DelimiterMode, ExcludedRegion, LogicalStatement,
    SourceSubmission, Span, StatementKind,
};
