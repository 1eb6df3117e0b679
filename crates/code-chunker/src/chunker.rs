use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::syntax;
use crate::types::{
    Blocker, ChunkOutput, Completeness, DelimiterMode, ExcludedRegion, LogicalStatement,
    SourceSubmission, Span, StatementKind,
};

/// Splits submitted Stata source into logical statements
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker with configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate().map_err(ChunkerError::invalid_config)?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk one submission, starting from the mode it arrived with
    pub fn chunk(&self, submission: &SourceSubmission) -> Result<ChunkOutput> {
        self.chunk_str(submission.text(), submission.mode())
    }

    /// Chunk raw text read in `mode`
    pub fn chunk_str(&self, text: &str, mode: DelimiterMode) -> Result<ChunkOutput> {
        if text.len() > self.config.max_submission_bytes {
            return Err(ChunkerError::SubmissionTooLarge {
                size: text.len(),
                limit: self.config.max_submission_bytes,
            });
        }

        let output = Scanner::new(text, mode, &self.config).run();
        log::debug!(
            "chunked {} bytes into {} statement(s), mode {} -> {}, {:?}",
            text.len(),
            output.statements.len(),
            mode,
            output.ending_mode,
            output.completeness
        );
        Ok(output)
    }

    /// Whether `text` read in `mode` is a complete set of statements.
    ///
    /// Only structural blockers make text incomplete. Text that cannot run
    /// for other reasons (over the size limit) counts as complete so that
    /// executing it reports the real error.
    ///
    /// Pure: nothing is dispatched and no state is touched.
    #[must_use]
    pub fn is_complete(&self, text: &str, mode: DelimiterMode) -> bool {
        match self.chunk_str(text, mode) {
            Ok(output) => output.completeness.is_complete(),
            Err(err) => {
                log::debug!("treating unrunnable text as complete: {err}");
                true
            }
        }
    }
}

/// [`Chunker::is_complete`] with the default configuration
#[must_use]
pub fn is_complete(text: &str, mode: DelimiterMode) -> bool {
    Chunker::default().is_complete(text, mode)
}

/// Byte-level state machine over one submission.
///
/// Every syntactically meaningful character in Stata is ASCII, so the scanner
/// walks bytes and copies anything else through untouched.
struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    config: &'a ChunkerConfig,
    pos: usize,
    mode: DelimiterMode,
    /// Mode the current statement started in
    stmt_mode: DelimiterMode,
    stmt_start: usize,
    depth: usize,
    /// Normalized text of the current statement
    buf: Vec<u8>,
    /// Verbatim lines of an open `program`/`mata`/`python`/`input` block
    block_lines: Vec<String>,
    text_block: Option<&'static str>,
    /// The next non-blank byte begins a command (`*` comments, `#delimit`)
    command_start: bool,
    open_comment: bool,
    open_continuation: bool,
    /// A top-level block closed in the current statement; an `else` may follow
    closed_block: bool,
    statements: Vec<LogicalStatement>,
    excluded: Option<ExcludedRegion>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, mode: DelimiterMode, config: &'a ChunkerConfig) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            config,
            pos: 0,
            mode,
            stmt_mode: mode,
            stmt_start: 0,
            depth: 0,
            buf: Vec::new(),
            block_lines: Vec::new(),
            text_block: None,
            command_start: true,
            open_comment: false,
            open_continuation: false,
            closed_block: false,
            statements: Vec::new(),
            excluded: None,
        }
    }

    fn run(mut self) -> ChunkOutput {
        while self.pos < self.bytes.len() && self.excluded.is_none() {
            if self.text_block.is_some() {
                self.text_block_line();
                continue;
            }

            if self.command_start {
                self.skip_blanks();
                self.command_start = false;
                if self.pos >= self.bytes.len() {
                    break;
                }
                if self.try_directive() {
                    continue;
                }
                if self.peek(0) == Some(b'*') {
                    self.star_comment();
                    continue;
                }
            }

            let byte = self.bytes[self.pos];
            match byte {
                b'\n' => self.newline(),
                b'"' => self.string_literal(),
                b'`' if self.peek(1) == Some(b'"') => self.compound_string(),
                b'/' if self.comment_marker(b"///") => self.continuation(),
                b'/' if self.comment_marker(b"//") => self.pos = self.line_end(self.pos),
                b'/' if self.peek(1) == Some(b'*') => self.block_comment(),
                b'{' => self.open_brace(),
                b'}' => self.close_brace(),
                b';' if self.mode == DelimiterMode::Semicolon => self.semicolon(),
                b' ' | b'\t' | b'\r' | 0x0c => {
                    self.push_space();
                    self.pos += 1;
                }
                _ => {
                    self.buf.push(byte);
                    self.pos += 1;
                }
            }
        }

        self.finish()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn starts_with_at(&self, at: usize, pattern: &[u8]) -> bool {
        self.bytes
            .get(at..)
            .is_some_and(|rest| rest.starts_with(pattern))
    }

    /// `//` and `///` only count when they start a line or follow whitespace
    fn comment_marker(&self, marker: &[u8]) -> bool {
        if !self.starts_with_at(self.pos, marker) {
            return false;
        }
        self.pos == 0 || self.bytes[self.pos - 1].is_ascii_whitespace()
    }

    /// Index of the next `\n` at or after `from`, or the end of text
    fn line_end(&self, from: usize) -> usize {
        self.bytes[from..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.bytes.len(), |offset| from + offset)
    }

    fn skip_blanks(&mut self) {
        while let Some(byte) = self.peek(0) {
            let blank = match byte {
                b' ' | b'\t' | b'\r' | 0x0c => true,
                b'\n' => self.mode == DelimiterMode::Semicolon,
                _ => false,
            };
            if !blank {
                break;
            }
            self.pos += 1;
        }
    }

    fn push_space(&mut self) {
        if matches!(self.buf.last(), Some(b) if *b != b' ' && *b != b'\n') {
            self.buf.push(b' ');
        }
    }

    /// Text of the current normalized line, i.e. after the last pushed newline
    fn current_line(&self) -> &[u8] {
        let start = self
            .buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |idx| idx + 1);
        &self.buf[start..]
    }

    fn try_directive(&mut self) -> bool {
        if self.depth != 0 || !self.buf.is_empty() {
            return false;
        }
        let eol = self.line_end(self.pos);
        let Some(mode) = syntax::parse_delimit(&self.src[self.pos..eol]) else {
            return false;
        };

        let end = (eol + 1).min(self.bytes.len());
        self.pos = end;
        self.statements.push(LogicalStatement {
            text: mode.directive(),
            span: Span::new(self.stmt_start, end),
            mode: self.stmt_mode,
            kind: StatementKind::Directive(mode),
            terminated: true,
        });
        log::debug!("delimiter switched to {mode} at byte {end}");
        self.mode = mode;
        self.reset_statement(end);
        true
    }

    fn star_comment(&mut self) {
        match self.mode {
            DelimiterMode::Newline => loop {
                let eol = self.line_end(self.pos);
                let continued = self.src[self.pos..eol].trim_end().ends_with("///");
                self.pos = eol;
                if !continued {
                    break;
                }
                if eol + 1 >= self.bytes.len() {
                    self.pos = self.bytes.len();
                    self.open_continuation = true;
                    break;
                }
                self.pos = eol + 1;
            },
            DelimiterMode::Semicolon => {
                self.pos = self.bytes[self.pos..]
                    .iter()
                    .position(|&b| b == b';')
                    .map_or(self.bytes.len(), |offset| self.pos + offset);
            }
        }
    }

    fn newline(&mut self) {
        match self.mode {
            DelimiterMode::Semicolon => {
                self.pos += 1;
                if self.depth == 0 && self.directive_line_at(self.pos) {
                    // `#delimit` always starts a statement of its own
                    if self.buf.iter().all(|&b| b == b' ') {
                        self.buf.clear();
                        self.command_start = true;
                    } else {
                        self.terminate(self.pos, true);
                    }
                    return;
                }
                self.push_space();
            }
            DelimiterMode::Newline if self.depth > 0 => {
                self.buf.push(b'\n');
                self.pos += 1;
                self.command_start = true;
            }
            DelimiterMode::Newline => {
                self.pos += 1;
                if self.join_else() {
                    return;
                }
                if self.config.text_blocks && !self.buf.contains(&b'\n') {
                    let first_line = String::from_utf8_lossy(&self.buf);
                    if let Some(opener) = syntax::text_block_opener(first_line.trim()) {
                        log::debug!("entering {opener} block at byte {}", self.pos);
                        self.text_block = Some(opener);
                        return;
                    }
                }
                self.terminate(self.pos, true);
            }
        }
    }

    fn text_block_line(&mut self) {
        let eol = self.line_end(self.pos);
        let line = self.src[self.pos..eol].trim_end().to_string();
        self.pos = (eol + 1).min(self.bytes.len());

        let closes = line.trim() == "end";
        self.block_lines.push(if closes { "end".to_string() } else { line });
        if closes {
            self.text_block = None;
            self.terminate(self.pos, eol < self.bytes.len());
        }
    }

    fn string_literal(&mut self) {
        self.buf.push(b'"');
        self.pos += 1;
        while let Some(byte) = self.peek(0) {
            if byte == b'\n' || (byte == b'\r' && self.peek(1) == Some(b'\n')) {
                return;
            }
            self.buf.push(byte);
            self.pos += 1;
            if byte == b'"' {
                return;
            }
        }
    }

    fn compound_string(&mut self) {
        let mut level = 0usize;
        while let Some(byte) = self.peek(0) {
            if byte == b'\n' || (byte == b'\r' && self.peek(1) == Some(b'\n')) {
                return;
            }
            if self.starts_with_at(self.pos, b"`\"") {
                level += 1;
                self.buf.extend_from_slice(b"`\"");
                self.pos += 2;
                continue;
            }
            if self.starts_with_at(self.pos, b"\"'") {
                level = level.saturating_sub(1);
                self.buf.extend_from_slice(b"\"'");
                self.pos += 2;
                if level == 0 {
                    return;
                }
                continue;
            }
            self.buf.push(byte);
            self.pos += 1;
        }
    }

    fn continuation(&mut self) {
        let eol = self.line_end(self.pos);
        if eol + 1 >= self.bytes.len() {
            self.pos = self.bytes.len();
            self.open_continuation = true;
            return;
        }
        self.pos = eol + 1;
        self.push_space();
    }

    fn block_comment(&mut self) {
        let mut level = 0usize;
        loop {
            if self.pos >= self.bytes.len() {
                self.open_comment = true;
                return;
            }
            if self.starts_with_at(self.pos, b"/*") {
                level += 1;
                self.pos += 2;
            } else if self.starts_with_at(self.pos, b"*/") {
                level -= 1;
                self.pos += 2;
                if level == 0 {
                    break;
                }
            } else {
                self.pos += 1;
            }
        }
        self.push_space();
    }

    /// Whether only blanks and comments (and `;` in semicolon mode) remain
    /// on the current physical line from `from`
    fn rest_of_line_blank(&self, from: usize) -> bool {
        let allow_semicolon = self.mode == DelimiterMode::Semicolon;
        let mut i = from;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\n' => return true,
                b' ' | b'\t' | b'\r' | 0x0c => i += 1,
                b';' if allow_semicolon => i += 1,
                b'/' if self.starts_with_at(i, b"//") => {
                    return self.bytes[i - 1].is_ascii_whitespace();
                }
                b'/' if self.starts_with_at(i, b"/*") => {
                    match self.src[i + 2..].find("*/") {
                        Some(offset) => i += 2 + offset + 2,
                        None => return true,
                    }
                }
                _ => return false,
            }
        }
        true
    }

    fn open_brace(&mut self) {
        self.buf.push(b'{');
        self.pos += 1;
        if !self.rest_of_line_blank(self.pos) {
            return;
        }
        self.depth += 1;
        if self.mode == DelimiterMode::Semicolon {
            self.buf.push(b'\n');
            self.command_start = true;
        }
    }

    fn close_brace(&mut self) {
        let alone = self.current_line().iter().all(|&b| b == b' ')
            && self.rest_of_line_blank(self.pos + 1);
        if self.depth == 0 || !alone {
            self.buf.push(b'}');
            self.pos += 1;
            return;
        }

        while self.buf.last() == Some(&b' ') {
            self.buf.pop();
        }
        self.depth -= 1;
        self.buf.push(b'}');
        self.pos += 1;
        self.closed_block = self.depth == 0;
        if self.mode == DelimiterMode::Semicolon && self.depth > 0 {
            self.buf.push(b'\n');
            self.command_start = true;
        }
    }

    /// Whether the physical line at `from` is a `#delimit` directive
    fn directive_line_at(&self, from: usize) -> bool {
        let eol = self.line_end(from);
        syntax::parse_delimit(self.src[from..eol].trim_start()).is_some()
    }

    /// Position of an `else` that continues the block just closed, looking
    /// past blank lines and comments
    fn else_after(&self, from: usize) -> Option<usize> {
        let mut i = from;
        loop {
            match *self.bytes.get(i)? {
                b' ' | b'\t' | b'\r' | b'\n' | 0x0c => i += 1,
                b'*' => {
                    i = match self.mode {
                        DelimiterMode::Newline => self.line_end(i),
                        DelimiterMode::Semicolon => i + 1 + self.src[i..].find(';')?,
                    };
                }
                b'/' if self.starts_with_at(i, b"//") => i = self.line_end(i),
                b'/' if self.starts_with_at(i, b"/*") => {
                    i += 2 + self.src[i + 2..].find("*/")? + 2;
                }
                _ => break,
            }
        }
        let rest = &self.bytes[i..];
        let boundary = rest
            .get(4)
            .map_or(true, |&b| b.is_ascii_whitespace() || b == b'{');
        (rest.starts_with(b"else") && boundary).then_some(i)
    }

    /// Keep `if {...}` and a following `else` in one statement. The
    /// terminator at `self.pos - 1` has already been consumed.
    fn join_else(&mut self) -> bool {
        let ends_block = self.buf.iter().rev().find(|&&b| b != b' ') == Some(&b'}');
        if !self.closed_block || !ends_block {
            return false;
        }
        let Some(at) = self.else_after(self.pos) else {
            return false;
        };
        log::debug!("else at byte {at} continues the preceding block");
        self.buf.push(b'\n');
        self.pos = at;
        self.closed_block = false;
        self.command_start = false;
        true
    }

    fn semicolon(&mut self) {
        self.pos += 1;
        if self.depth == 0 {
            if self.join_else() {
                return;
            }
            self.terminate(self.pos, true);
        } else {
            self.buf.push(b'\n');
            self.command_start = true;
        }
    }

    fn reset_statement(&mut self, at: usize) {
        self.buf.clear();
        self.block_lines.clear();
        self.stmt_start = at;
        self.stmt_mode = self.mode;
        self.command_start = true;
        self.closed_block = false;
    }

    fn normalized_text(&self) -> String {
        let raw = String::from_utf8_lossy(&self.buf);
        let mut lines: Vec<&str> = raw
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        lines.extend(self.block_lines.iter().map(String::as_str));
        lines.join("\n")
    }

    fn terminate(&mut self, end: usize, terminated: bool) {
        let text = self.normalized_text();
        let kind = if text.is_empty() {
            StatementKind::Blank
        } else if text.contains('\n') {
            StatementKind::Block
        } else {
            StatementKind::Command
        };

        let span = Span::new(self.stmt_start, end);
        if self.config.exclude_after_exit && kind == StatementKind::Command && syntax::is_exit(&text)
        {
            log::debug!("exit at byte {}, excluding the rest of the submission", span.start);
            let excluded = Span::new(span.start, self.bytes.len());
            self.excluded = Some(ExcludedRegion {
                span: excluded,
                text: excluded.slice(self.src).to_string(),
            });
            self.pos = self.bytes.len();
            return;
        }

        self.statements.push(LogicalStatement {
            text,
            span,
            mode: self.stmt_mode,
            kind,
            terminated,
        });
        self.reset_statement(end);
    }

    fn finish(mut self) -> ChunkOutput {
        if self.excluded.is_none() && self.stmt_start < self.bytes.len() {
            self.terminate(self.bytes.len(), false);
        }

        let completeness = if self.excluded.is_some() {
            Completeness::Complete
        } else if self.open_comment {
            Completeness::Incomplete(Blocker::OpenComment)
        } else if let Some(opener) = self.text_block {
            Completeness::Incomplete(Blocker::OpenTextBlock {
                opener: opener.to_string(),
            })
        } else if self.depth > 0 {
            Completeness::Incomplete(Blocker::OpenBrace { depth: self.depth })
        } else if self.open_continuation {
            Completeness::Incomplete(Blocker::OpenContinuation)
        } else {
            Completeness::Complete
        };

        ChunkOutput {
            statements: self.statements,
            excluded: self.excluded,
            ending_mode: self.mode,
            completeness,
        }
    }
}
