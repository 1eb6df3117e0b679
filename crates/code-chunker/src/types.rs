use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How statements are terminated: at newlines (`#delimit cr`) or at
/// semicolons (`#delimit ;`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterMode {
    #[default]
    Newline,
    Semicolon,
}

impl DelimiterMode {
    /// Argument accepted by `#delimit` for this mode
    #[must_use]
    pub const fn as_directive_arg(self) -> &'static str {
        match self {
            Self::Newline => "cr",
            Self::Semicolon => ";",
        }
    }

    /// Source line that switches to this mode
    #[must_use]
    pub fn directive(self) -> String {
        format!("#delimit {}", self.as_directive_arg())
    }
}

impl fmt::Display for DelimiterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive_arg())
    }
}

impl FromStr for DelimiterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cr" | "newline" => Ok(Self::Newline),
            ";" | "semicolon" => Ok(Self::Semicolon),
            other => Err(format!("unknown delimiter mode '{other}' (expected cr or ;)")),
        }
    }
}

/// One execution request: raw text plus the mode in effect when it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSubmission {
    text: String,
    mode: DelimiterMode,
}

impl SourceSubmission {
    pub fn new(text: impl Into<String>, mode: DelimiterMode) -> Self {
        Self {
            text: text.into(),
            mode,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn mode(&self) -> DelimiterMode {
        self.mode
    }
}

/// Byte range `[start, end)` into the submitted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice of `text` covered by this span
    #[must_use]
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end).unwrap_or_default()
    }
}

/// What a logical statement turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "mode")]
pub enum StatementKind {
    /// Single-line command
    Command,
    /// Brace block or verbatim text block spanning several lines
    Block,
    /// `#delimit` directive switching to the carried mode
    Directive(DelimiterMode),
    /// Nothing left after comments and whitespace are removed
    Blank,
}

impl StatementKind {
    /// Human-readable name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Block => "block",
            Self::Directive(_) => "directive",
            Self::Blank => "blank",
        }
    }

    #[must_use]
    pub const fn is_suppressible(self) -> bool {
        matches!(self, Self::Directive(_) | Self::Blank)
    }
}

/// A delimiter-terminated unit of source after continuation joining and
/// comment stripping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalStatement {
    /// Normalized text, ready to be sent in newline mode
    pub text: String,

    /// Original bytes covered, terminator included
    pub span: Span,

    /// Mode the statement was read in
    pub mode: DelimiterMode,

    pub kind: StatementKind,

    /// False only for a final statement cut short by end of text
    pub terminated: bool,
}

impl LogicalStatement {
    #[must_use]
    pub const fn is_suppressible(&self) -> bool {
        self.kind.is_suppressible()
    }

    /// Whether this statement is sent to the interpreter
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        !self.is_suppressible()
    }
}

/// Text that is neither hashed nor executed but handed to the command log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedRegion {
    pub span: Span,
    pub text: String,
}

/// Structural reason a submission cannot be run yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "blocker")]
pub enum Blocker {
    /// Braces opened but not closed
    OpenBrace { depth: usize },
    /// Text ends on a `///` continuation
    OpenContinuation,
    /// Text ends inside a `/* */` comment
    OpenComment,
    /// Text ends inside a `program`/`mata`/`python`/`input` block
    OpenTextBlock { opener: String },
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenBrace { depth } => write!(f, "{depth} unclosed brace(s)"),
            Self::OpenContinuation => f.write_str("line continuation (///) at end of input"),
            Self::OpenComment => f.write_str("unterminated /* comment"),
            Self::OpenTextBlock { opener } => write!(f, "'{opener}' block has no matching 'end'"),
        }
    }
}

/// Whether the text, as given, is a complete set of statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Completeness {
    Complete,
    Incomplete(Blocker),
}

impl Completeness {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Everything one chunking pass produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutput {
    pub statements: Vec<LogicalStatement>,
    pub excluded: Option<ExcludedRegion>,
    /// Mode in effect at the end of the processed text
    pub ending_mode: DelimiterMode,
    pub completeness: Completeness,
}

impl ChunkOutput {
    /// Statements that are sent to the interpreter, in order
    pub fn executable(&self) -> impl Iterator<Item = &LogicalStatement> {
        self.statements.iter().filter(|s| s.is_executable())
    }
}
