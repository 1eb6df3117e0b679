use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::syntax;
use crate::types::{
    ChunkOutput, Completeness, DelimiterMode, ExcludedRegion, LogicalStatement,
};

/// Whether a statement's output reaches the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Echo,
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStatement {
    #[serde(flatten)]
    pub statement: LogicalStatement,
    pub visibility: Visibility,
}

impl PlannedStatement {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.statement.text
    }

    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.statement.is_executable()
    }

    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.visibility == Visibility::Silent
    }
}

/// Lowercase hex SHA-256 of the normalized executable text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of already normalized text
    #[must_use]
    pub fn of(normalized: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex_encode_lower(&hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, enough to name files and markers
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Statements selected for one dispatch, with their fingerprint and the
/// delimiter mode to persist afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub statements: Vec<PlannedStatement>,
    pub fingerprint: Fingerprint,
    pub starting_mode: DelimiterMode,
    pub ending_mode: DelimiterMode,
    pub excluded: Option<ExcludedRegion>,
}

impl ChunkPlan {
    /// Statements sent to the interpreter, in order
    pub fn executable(&self) -> impl Iterator<Item = &PlannedStatement> {
        self.statements.iter().filter(|s| s.is_executable())
    }

    #[must_use]
    pub fn executable_count(&self) -> usize {
        self.executable().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executable_count() == 0
    }

    /// Exactly the text the fingerprint was computed over
    #[must_use]
    pub fn normalized_text(&self) -> String {
        normalized_text(self.statements.iter().map(|s| &s.statement))
    }

    #[must_use]
    pub fn mode_changed(&self) -> bool {
        self.starting_mode != self.ending_mode
    }

    /// Render the executable statements as source readable starting in
    /// `mode`. Re-chunking the result yields the same executable statements.
    #[must_use]
    pub fn render_source(&self, mode: DelimiterMode) -> String {
        let mut out = String::new();
        let mut current = mode;
        for planned in self.executable() {
            let statement = &planned.statement;
            if statement.mode != current {
                out.push_str(&statement.mode.directive());
                out.push('\n');
                current = statement.mode;
            }
            match current {
                DelimiterMode::Newline => {
                    out.push_str(&statement.text);
                    out.push('\n');
                }
                DelimiterMode::Semicolon => {
                    for line in statement.text.lines() {
                        out.push_str(line);
                        out.push_str(";\n");
                    }
                }
            }
        }
        out
    }
}

fn normalized_text<'a>(statements: impl Iterator<Item = &'a LogicalStatement>) -> String {
    statements
        .filter(|s| s.is_executable())
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns chunker output into a [`ChunkPlan`]
#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    config: ChunkerConfig,
}

impl ChunkPlanner {
    #[must_use]
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Build the plan for a complete chunking pass
    pub fn plan(&self, output: ChunkOutput, starting_mode: DelimiterMode) -> Result<ChunkPlan> {
        if let Completeness::Incomplete(blocker) = output.completeness {
            return Err(ChunkerError::Incomplete(blocker));
        }
        check_spans(&output)?;

        let fingerprint = Fingerprint::of(&normalized_text(output.statements.iter()));
        let statements: Vec<PlannedStatement> = output
            .statements
            .into_iter()
            .map(|statement| {
                let visibility = self.visibility(&statement);
                PlannedStatement {
                    statement,
                    visibility,
                }
            })
            .collect();

        log::debug!(
            "planned {} executable statement(s), fingerprint {}",
            statements.iter().filter(|s| s.is_executable()).count(),
            fingerprint.short()
        );

        Ok(ChunkPlan {
            statements,
            fingerprint,
            starting_mode,
            ending_mode: output.ending_mode,
            excluded: output.excluded,
        })
    }

    fn visibility(&self, statement: &LogicalStatement) -> Visibility {
        if statement.is_suppressible() {
            return Visibility::Silent;
        }
        if !self.config.silence_quiet_prefixes {
            return Visibility::Echo;
        }
        let first_line = statement.text.lines().next().unwrap_or_default();
        let (_, silent) = syntax::strip_prefixes(first_line);
        if silent {
            Visibility::Silent
        } else {
            Visibility::Echo
        }
    }
}

/// Statement spans must be contiguous and the excluded region must follow them
fn check_spans(output: &ChunkOutput) -> Result<()> {
    let mut cursor = 0usize;
    for statement in &output.statements {
        if statement.span.start != cursor || statement.span.end < statement.span.start {
            return Err(ChunkerError::InvalidSpan {
                start: statement.span.start,
                end: statement.span.end,
            });
        }
        cursor = statement.span.end;
    }
    if let Some(excluded) = &output.excluded {
        if excluded.span.start != cursor {
            return Err(ChunkerError::InvalidSpan {
                start: excluded.span.start,
                end: excluded.span.end,
            });
        }
    }
    Ok(())
}
