//! Cursor-context completion.
//!
//! The vocabulary is rebuilt from the code the user runs: variables created
//! with `generate`, macros defined with `local`/`global`, scalars and
//! matrices. Nothing is asked of the interpreter.

use once_cell::sync::Lazy;
use regex::Regex;
use stata_code_chunker::{syntax, DelimiterMode};
use stata_protocol::CompleteReply;
use std::collections::BTreeSet;
use std::path::Path;

static GENERATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:g(?:e(?:n(?:e(?:r(?:a(?:t(?:e)?)?)?)?)?)?)?|egen)\s+(?:(?:byte|int|long|float|double|str\d*|strL)\s+)?([A-Za-z_]\w*)",
    )
    .expect("valid generate regex")
});

static LOCAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:loc(?:a(?:l)?)?|foreach|forv(?:a(?:l(?:u(?:e(?:s)?)?)?)?)?)\s+([A-Za-z_]\w*)")
        .expect("valid local regex")
});

static TEMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^temp(?:var|name|file)\s+(.+)$").expect("valid temp regex"));

static GLOBAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^gl(?:o(?:b(?:a(?:l)?)?)?)?\s+([A-Za-z_]\w*)").expect("valid global regex")
});

static SCALAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sca(?:l(?:a(?:r)?)?)?\s+(?:de(?:f(?:i(?:n(?:e)?)?)?)?\s+)?([A-Za-z_]\w*)\s*=")
        .expect("valid scalar regex")
});

static MATRIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^mat(?:r(?:i(?:x)?)?)?\s+(?:de(?:f(?:i(?:n(?:e)?)?)?)?\s+)?([A-Za-z_]\w*)\s*=")
        .expect("valid matrix regex")
});

static RENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ren(?:a(?:m(?:e)?)?)?\s+([A-Za-z_]\w*)\s+([A-Za-z_]\w*)\s*$")
        .expect("valid rename regex")
});

static DROP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^drop\s+([A-Za-z_][\w\s]*)$").expect("valid drop regex"));

static NEW_DATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:clear(?:\s+all)?|(?:sys)?use\s+.+|u\s+.+)$").expect("valid new data regex")
});

/// What kind of name the cursor is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEnv {
    Variable,
    /// After `` ` ``
    Local,
    /// After `$`
    Global,
    /// After `${`
    GlobalBraced,
    /// Argument of `scalar`
    Scalar,
    /// Argument of `matrix`
    Matrix,
    /// Inside a string literal
    Path,
    /// `%name` at the start of a cell
    Magic,
}

/// Where the replaced text starts and what it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub env: CompletionEnv,
    /// Byte offset of the prefix in the text before the cursor
    pub start: usize,
    pub prefix: String,
    /// Appended to every match when the text after the cursor lacks it
    pub closer: Option<&'static str>,
}

/// Names known to the session, rebuilt after each successful run
#[derive(Debug, Clone, Default)]
pub struct CompletionState {
    variables: BTreeSet<String>,
    locals: BTreeSet<String>,
    globals: BTreeSet<String>,
    scalars: BTreeSet<String>,
    matrices: BTreeSet<String>,
    magics: Vec<String>,
}

impl CompletionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names offered after `%`
    #[must_use]
    pub fn with_magics<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.magics = names.into_iter().map(str::to_string).collect();
        self.magics.sort();
        self
    }

    #[must_use]
    pub const fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    #[must_use]
    pub const fn locals(&self) -> &BTreeSet<String> {
        &self.locals
    }

    #[must_use]
    pub const fn globals(&self) -> &BTreeSet<String> {
        &self.globals
    }

    /// Re-scan code that just ran
    pub fn refresh(&mut self, raw_text: &str) {
        for command in raw_text.split(['\n', ';']) {
            let (command, _) = syntax::strip_prefixes(command.trim());
            self.scan(command.trim());
        }
        log::debug!(
            "completion vocabulary: {} variable(s), {} local(s), {} global(s)",
            self.variables.len(),
            self.locals.len(),
            self.globals.len()
        );
    }

    fn scan(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        if NEW_DATA_RE.is_match(command) {
            self.variables.clear();
            return;
        }
        if let Some(name) = first_capture(&GENERATE_RE, command) {
            self.variables.insert(name);
        } else if let Some(name) = first_capture(&LOCAL_RE, command) {
            self.locals.insert(name);
        } else if let Some(names) = first_capture(&TEMP_RE, command) {
            self.locals.extend(names.split_whitespace().map(str::to_string));
        } else if let Some(name) = first_capture(&GLOBAL_RE, command) {
            self.globals.insert(name);
        } else if let Some(name) = first_capture(&SCALAR_RE, command) {
            self.scalars.insert(name);
        } else if let Some(name) = first_capture(&MATRIX_RE, command) {
            self.matrices.insert(name);
        } else if let Some(caps) = RENAME_RE.captures(command) {
            if let (Some(old), Some(new)) = (caps.get(1), caps.get(2)) {
                self.variables.remove(old.as_str());
                self.variables.insert(new.as_str().to_string());
            }
        } else if let Some(names) = first_capture(&DROP_RE, command) {
            // `drop if`/`drop in` remove observations, not variables
            let dropped = names
                .split_whitespace()
                .take_while(|word| !matches!(*word, "if" | "in"));
            for name in dropped {
                self.variables.remove(name);
            }
        }
    }

    /// Classify the cursor position from the text around it
    #[must_use]
    pub fn get_env(before: &str, after: &str, mode: DelimiterMode) -> CompletionRequest {
        let statement_start = match mode {
            DelimiterMode::Newline => before.rfind('\n').map_or(0, |i| i + 1),
            DelimiterMode::Semicolon => before.rfind(';').map_or(0, |i| i + 1),
        };
        let statement = &before[statement_start..];

        if statement.matches('"').count() % 2 == 1 {
            let start = before.rfind('"').map_or(0, |i| i + 1);
            return CompletionRequest {
                env: CompletionEnv::Path,
                start,
                prefix: before[start..].to_string(),
                closer: None,
            };
        }

        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
            .last()
            .map_or(before.len(), |(i, _)| i);
        let prefix = before[start..].to_string();
        let lead = &before[..start];

        let closer_unless = |closer: &'static str| (!after.starts_with(closer)).then_some(closer);

        let (env, closer) = if lead.ends_with('`') {
            (CompletionEnv::Local, closer_unless("'"))
        } else if lead.ends_with("${") {
            (CompletionEnv::GlobalBraced, closer_unless("}"))
        } else if lead.ends_with('$') {
            (CompletionEnv::Global, None)
        } else if statement_start == 0 && lead.trim_start() == "%" {
            (CompletionEnv::Magic, None)
        } else {
            (command_env(&before[statement_start..start]), None)
        };

        CompletionRequest {
            env,
            start,
            prefix,
            closer,
        }
    }

    /// Candidates for `request`, closers appended
    #[must_use]
    pub fn candidates(&self, request: &CompletionRequest) -> Vec<String> {
        let pool: Vec<String> = match request.env {
            CompletionEnv::Variable => self.variables.iter().cloned().collect(),
            CompletionEnv::Local => self.locals.iter().cloned().collect(),
            CompletionEnv::Global | CompletionEnv::GlobalBraced => {
                self.globals.iter().cloned().collect()
            }
            CompletionEnv::Scalar => self.scalars.iter().cloned().collect(),
            CompletionEnv::Matrix => self.matrices.iter().cloned().collect(),
            CompletionEnv::Magic => self.magics.clone(),
            CompletionEnv::Path => return path_candidates(&request.prefix),
        };
        pool.into_iter()
            .filter(|name| name.starts_with(&request.prefix))
            .map(|name| match request.closer {
                Some(closer) => format!("{name}{closer}"),
                None => name,
            })
            .collect()
    }

    /// Completions at `cursor_pos`, counted in code points
    #[must_use]
    pub fn complete(&self, code: &str, cursor_pos: usize, mode: DelimiterMode) -> CompleteReply {
        let cursor = code
            .char_indices()
            .nth(cursor_pos)
            .map_or(code.len(), |(i, _)| i);
        let before = &code[..cursor];
        let after: String = code[cursor..].chars().take(2).collect();

        let request = Self::get_env(before, &after, mode);
        CompleteReply {
            cursor_start: before[..request.start].chars().count(),
            cursor_end: before.chars().count(),
            matches: self.candidates(&request),
        }
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Environment implied by the command word of a statement
fn command_env(statement_head: &str) -> CompletionEnv {
    let (command, _) = syntax::strip_prefixes(statement_head);
    let mut words = command.split_whitespace();
    let Some(first) = words.next() else {
        return CompletionEnv::Variable;
    };
    if words.next().is_none() && !command.ends_with(char::is_whitespace) {
        return CompletionEnv::Variable;
    }
    match first {
        "sca" | "scal" | "scala" | "scalar" => CompletionEnv::Scalar,
        "mat" | "matr" | "matri" | "matrix" => CompletionEnv::Matrix,
        _ => CompletionEnv::Variable,
    }
}

fn path_candidates(prefix: &str) -> Vec<String> {
    let (dir, stem) = match prefix.rfind(['/', '\\']) {
        Some(i) => (&prefix[..=i], &prefix[i + 1..]),
        None => ("", prefix),
    };
    let search = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
    let Ok(entries) = std::fs::read_dir(search) else {
        return Vec::new();
    };

    let mut matches: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if !name.starts_with(stem) || (name.starts_with('.') && !stem.starts_with('.')) {
                return None;
            }
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            Some(format!("{dir}{name}{}", if is_dir { "/" } else { "" }))
        })
        .collect();
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> CompletionState {
        let mut state = CompletionState::new().with_magics(["time", "delimit", "locals"]);
        state.refresh(
            "sysuse auto\ngen price2 = price^2\nqui egen mean_mpg = mean(mpg)\n\
             local controls weight length\nglobal root \"/data\"\nscalar s_total = 5\n\
             matrix define m_beta = e(b)\nforeach v in a b {\n  di `v'\n}\ntempvar tmp1 tmp2",
        );
        state
    }

    #[test]
    fn refresh_collects_definitions() {
        let state = state();
        assert_eq!(
            state.variables().iter().cloned().collect::<Vec<_>>(),
            vec!["mean_mpg", "price2"]
        );
        assert_eq!(
            state.locals().iter().cloned().collect::<Vec<_>>(),
            vec!["controls", "tmp1", "tmp2", "v"]
        );
        assert_eq!(
            state.globals().iter().cloned().collect::<Vec<_>>(),
            vec!["root"]
        );
    }

    #[test]
    fn rename_drop_and_new_data() {
        let mut state = state();
        state.refresh("rename price2 psq\ndrop mean_mpg");
        assert_eq!(state.variables().iter().cloned().collect::<Vec<_>>(), vec!["psq"]);
        state.refresh("use other.dta, clear");
        assert!(state.variables().is_empty());
    }

    #[test]
    fn drop_with_condition_keeps_variables() {
        let mut state = state();
        state.refresh("drop if price2");
        state.refresh("drop in 1");
        assert_eq!(
            state.variables().iter().cloned().collect::<Vec<_>>(),
            vec!["mean_mpg", "price2"]
        );

        state.refresh("drop mean_mpg if price2");
        assert_eq!(state.variables().iter().cloned().collect::<Vec<_>>(), vec!["price2"]);
    }

    #[test]
    fn env_detection() {
        let env = |before: &str, after: &str| {
            CompletionState::get_env(before, after, DelimiterMode::Newline).env
        };
        assert_eq!(env("summarize pr", ""), CompletionEnv::Variable);
        assert_eq!(env("di `con", ""), CompletionEnv::Local);
        assert_eq!(env("cd $ro", ""), CompletionEnv::Global);
        assert_eq!(env("cd ${ro", ""), CompletionEnv::GlobalBraced);
        assert_eq!(env("use \"data/au", ""), CompletionEnv::Path);
        assert_eq!(env("%ti", ""), CompletionEnv::Magic);
        assert_eq!(env("di scalar(s", ""), CompletionEnv::Variable);
        assert_eq!(env("scalar list s_", ""), CompletionEnv::Scalar);
        assert_eq!(env("mat list m", ""), CompletionEnv::Matrix);
        assert_eq!(env("x\n%ti", ""), CompletionEnv::Variable);
    }

    #[test]
    fn semicolon_mode_uses_last_statement() {
        let request =
            CompletionState::get_env("di 1;\nscalar list s", "", DelimiterMode::Semicolon);
        assert_eq!(request.env, CompletionEnv::Scalar);
        assert_eq!(request.prefix, "s");
    }

    #[test]
    fn local_closer_added_once() {
        let state = state();
        let reply = state.complete("di `con", 7, DelimiterMode::Newline);
        assert_eq!(reply.matches, vec!["controls'"]);
        assert_eq!((reply.cursor_start, reply.cursor_end), (4, 7));

        let reply = state.complete("di `con'", 7, DelimiterMode::Newline);
        assert_eq!(reply.matches, vec!["controls"]);
    }

    #[test]
    fn braced_global_gets_brace() {
        let reply = state().complete("cd ${r", 6, DelimiterMode::Newline);
        assert_eq!(reply.matches, vec!["root}"]);
    }

    #[test]
    fn cursor_counts_code_points() {
        let reply = state().complete("di \"é\" pr", 9, DelimiterMode::Newline);
        assert_eq!(reply.cursor_start, 7);
        assert_eq!(reply.matches, vec!["price2"]);
    }

    #[test]
    fn magic_names_complete() {
        let reply = state().complete("%ti", 3, DelimiterMode::Newline);
        assert_eq!(reply.matches, vec!["time"]);
        assert_eq!(reply.cursor_start, 1);
    }

    #[test]
    fn path_completion_lists_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("auto.dta"), b"").unwrap();
        std::fs::create_dir(dir.path().join("audit")).unwrap();
        std::fs::write(dir.path().join("other.do"), b"").unwrap();

        let prefix = format!("{}/au", dir.path().display());
        let matches = path_candidates(&prefix);
        let base = dir.path().display().to_string();
        assert_eq!(
            matches,
            vec![format!("{base}/audit/"), format!("{base}/auto.dta")]
        );
    }
}
