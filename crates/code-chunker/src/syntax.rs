//! Stata-specific recognizers used by the chunker and planner.
//!
//! Everything here works on a single, already normalized line.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::DelimiterMode;

/// `#delimit` and every abbreviation down to `#d`
static DELIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^#d(?:e(?:l(?:i(?:m(?:i(?:t)?)?)?)?)?)?(?:[ \t]+(?i:(cr))|[ \t]*(;))[ \t]*(?:(?://|/\*).*)?$",
    )
    .expect("valid delimit regex")
});

/// Command prefixes: `capture`, `quietly`, `noisily` and their abbreviations
static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(cap(?:t(?:u(?:r(?:e)?)?)?)?|qui(?:e(?:t(?:l(?:y)?)?)?)?|n(?:o(?:i(?:s(?:i(?:l(?:y)?)?)?)?)?)?)(?:\s*:\s*|\s+)",
    )
    .expect("valid prefix regex")
});

static PROGRAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pr(?:o(?:g(?:r(?:a(?:m)?)?)?)?)?\s+(?:(de(?:f(?:i(?:n(?:e)?)?)?)?)\s+)?([A-Za-z_][A-Za-z0-9_]*)")
        .expect("valid program regex")
});

static MATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^mata\s*:?$").expect("valid mata regex"));

static PYTHON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^python\s*:?$").expect("valid python regex"));

static INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^inp(?:u(?:t)?)?(?:\s|$)").expect("valid input regex"));

static EXIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^exit(?:\s|,|$)").expect("valid exit regex"));

/// `program` subcommands that do not open a definition block
const PROGRAM_SUBCOMMANDS: &[&str] = &["drop", "dir", "di", "list", "lis", "li", "l"];

/// Parse a `#delimit` directive line, returning the mode it switches to
#[must_use]
pub fn parse_delimit(line: &str) -> Option<DelimiterMode> {
    let caps = DELIMIT_RE.captures(line.trim_end())?;
    if caps.get(1).is_some() {
        Some(DelimiterMode::Newline)
    } else if caps.get(2).is_some() {
        Some(DelimiterMode::Semicolon)
    } else {
        None
    }
}

/// Strip `capture`/`quietly`/`noisily` prefixes, returning the remaining
/// command and whether its output is suppressed
#[must_use]
pub fn strip_prefixes(line: &str) -> (&str, bool) {
    let mut rest = line.trim_start();
    let mut silent = false;
    while let Some(caps) = PREFIX_RE.captures(rest) {
        let (Some(whole), Some(word)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        silent = !word.as_str().starts_with('n');
        rest = &rest[whole.end()..];
    }
    (rest, silent)
}

/// Name of the verbatim block this line opens, if any.
///
/// Blocks run until a line holding only `end`.
#[must_use]
pub fn text_block_opener(line: &str) -> Option<&'static str> {
    let (command, _) = strip_prefixes(line);
    let command = command.trim_end();

    if let Some(caps) = PROGRAM_RE.captures(command) {
        let name = caps.get(2).map_or("", |m| m.as_str());
        let has_define = caps.get(1).is_some();
        if PROGRAM_SUBCOMMANDS.contains(&name) && !has_define {
            return None;
        }
        if !has_define && "define".starts_with(name) && name.starts_with("de") {
            // `program define` with nothing after it
            return None;
        }
        return Some("program");
    }
    if MATA_RE.is_match(command) {
        return Some("mata");
    }
    if PYTHON_RE.is_match(command) {
        return Some("python");
    }
    if INPUT_RE.is_match(command) {
        return Some("input");
    }
    None
}

/// Whether a normalized command stops do-file execution
#[must_use]
pub fn is_exit(line: &str) -> bool {
    EXIT_RE.is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimit_abbreviations() {
        for line in ["#delimit ;", "#delim ;", "#d;", "#delimit cr", "#d cr", "#delimit CR"] {
            assert!(parse_delimit(line).is_some(), "{line} should parse");
        }
        assert_eq!(parse_delimit("#delimit ;"), Some(DelimiterMode::Semicolon));
        assert_eq!(parse_delimit("#delim cr // back"), Some(DelimiterMode::Newline));
        assert_eq!(parse_delimit("#dcr"), None);
        assert_eq!(parse_delimit("#delimit tab"), None);
        assert_eq!(parse_delimit("#delimiter ;"), None);
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(strip_prefixes("qui reg y x"), ("reg y x", true));
        assert_eq!(strip_prefixes("quietly: summarize"), ("summarize", true));
        assert_eq!(strip_prefixes("cap noi di 1"), ("di 1", false));
        assert_eq!(strip_prefixes("capture   drop x"), ("drop x", true));
        assert_eq!(strip_prefixes("display 1"), ("display 1", false));
        assert_eq!(strip_prefixes("quiz"), ("quiz", false));
    }

    #[test]
    fn test_text_block_openers() {
        assert_eq!(text_block_opener("program define myprog"), Some("program"));
        assert_eq!(text_block_opener("program myprog, rclass"), Some("program"));
        assert_eq!(text_block_opener("pr de myprog"), Some("program"));
        assert_eq!(text_block_opener("capture program define myprog"), Some("program"));
        assert_eq!(text_block_opener("program drop myprog"), None);
        assert_eq!(text_block_opener("program dir"), None);
        assert_eq!(text_block_opener("program define"), None);
        assert_eq!(text_block_opener("mata:"), Some("mata"));
        assert_eq!(text_block_opener("mata"), Some("mata"));
        assert_eq!(text_block_opener("mata: x = 1"), None);
        assert_eq!(text_block_opener("python:"), Some("python"));
        assert_eq!(text_block_opener("python script run.py"), None);
        assert_eq!(text_block_opener("input x y"), Some("input"));
        assert_eq!(text_block_opener("inputs"), None);
    }

    #[test]
    fn test_exit() {
        assert!(is_exit("exit"));
        assert!(is_exit("exit, clear"));
        assert!(is_exit("exit 198"));
        assert!(!is_exit("exitcode"));
        assert!(!is_exit("di exit"));
    }
}
