//! `%name` meta-commands handled before any Stata code is chunked.
//!
//! A magic either answers on its own ([`Interception::Intercepted`]) or
//! rewrites the submission and asks for a follow-up step once the code has
//! run ([`Interception::Continue`]).

use once_cell::sync::Lazy;
use regex::Regex;
use stata_code_chunker::DelimiterMode;
use stata_protocol::{ExecuteStatus, FrontendMessage};
use stata_session::ErrorPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Answered by the registry itself
const HELP: &str = "help";

static MAGIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^%([A-Za-z_][A-Za-z0-9_]*)[ \t]*([^\r\n]*)\r?\n?").expect("valid magic regex")
});

/// Kernel state a magic may read, and the settings it may change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicContext {
    pub mode: DelimiterMode,
    pub execution_count: u64,
    pub session_alive: bool,
    pub error_policy: ErrorPolicy,
    pub statement_timeout_secs: Option<u64>,
}

/// Reply of a magic that handled the submission itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicResponse {
    pub status: ExecuteStatus,
    pub messages: Vec<FrontendMessage>,
}

impl MagicResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            status: ExecuteStatus::Ok,
            messages: vec![FrontendMessage::stdout(text)],
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: ExecuteStatus::Error,
            messages: vec![FrontendMessage::stderr(text)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroScope {
    Local,
    Global,
}

/// Work to do after the rewritten code has been dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Report wall time since `started`
    ReportElapsed { started: Instant },
    /// Keep only the `macro list` lines of one scope, optionally matching a pattern
    FilterMacros {
        scope: MacroScope,
        pattern: Option<String>,
    },
}

impl PostAction {
    /// Whether the dispatch output has to be held back for this action
    #[must_use]
    pub const fn captures_output(&self) -> bool {
        matches!(self, Self::FilterMacros { .. })
    }

    /// Rewrite captured output. `None` leaves it untouched.
    #[must_use]
    pub fn filter_output(&self, output: &str) -> Option<String> {
        let Self::FilterMacros { scope, pattern } = self else {
            return None;
        };
        let mut kept = String::new();
        let mut keep_continuation = false;
        for line in output.lines() {
            if line.starts_with(char::is_whitespace) {
                if keep_continuation {
                    kept.push_str(line);
                    kept.push('\n');
                }
                continue;
            }
            let Some((name, _)) = line.split_once(':') else {
                keep_continuation = false;
                continue;
            };
            let (is_local, bare) = match name.strip_prefix('_') {
                Some(bare) => (true, bare),
                None => (false, name),
            };
            let in_scope = match scope {
                MacroScope::Local => is_local,
                MacroScope::Global => !is_local && !name.starts_with("S_"),
            };
            let matches = pattern.as_deref().map_or(true, |p| bare.contains(p));
            keep_continuation = in_scope && matches;
            if keep_continuation {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        Some(kept)
    }

    /// Message emitted once the dispatch finished
    #[must_use]
    pub fn report(&self) -> Option<FrontendMessage> {
        match self {
            Self::ReportElapsed { started } => Some(FrontendMessage::stdout(format!(
                "Elapsed: {:.3}s\n",
                started.elapsed().as_secs_f64()
            ))),
            Self::FilterMacros { .. } => None,
        }
    }
}

/// Result of consulting the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// The magic answered; nothing is chunked or dispatched
    Intercepted(MagicResponse),
    /// Run `code`, then apply `post`
    Continue {
        code: String,
        post: Vec<PostAction>,
    },
}

impl Interception {
    pub fn pass_through(code: impl Into<String>) -> Self {
        Self::Continue {
            code: code.into(),
            post: Vec::new(),
        }
    }
}

/// One parsed `%name args` line plus the code that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicInvocation<'a> {
    pub name: &'a str,
    pub args: &'a str,
    pub body: &'a str,
}

pub trait Magic: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line description shown by `%help`
    fn summary(&self) -> &'static str;

    fn run(&self, invocation: &MagicInvocation<'_>, context: &mut MagicContext) -> Interception;
}

/// Magics keyed by name
#[derive(Clone, Default)]
pub struct MagicRegistry {
    magics: BTreeMap<&'static str, Arc<dyn Magic>>,
}

impl std::fmt::Debug for MagicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MagicRegistry")
            .field("magics", &self.magics.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MagicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in magic
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DelimitMagic);
        registry.register(StatusMagic);
        registry.register(TimeMagic);
        registry.register(MacroMagic {
            scope: MacroScope::Local,
        });
        registry.register(MacroMagic {
            scope: MacroScope::Global,
        });
        registry.register(SetMagic);
        registry
    }

    /// Add or replace a magic
    pub fn register(&mut self, magic: impl Magic + 'static) {
        self.magics.insert(magic.name(), Arc::new(magic));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Magic>> {
        self.magics.get(name)
    }

    /// Every name `intercept` answers to, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.magics.keys().copied().collect();
        names.push(HELP);
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Look at the start of `text` for a magic and run it
    pub fn intercept(&self, text: &str, context: &mut MagicContext) -> Interception {
        let Some(invocation) = parse_invocation(text) else {
            return Interception::pass_through(text);
        };

        if invocation.name == HELP && !self.magics.contains_key(HELP) {
            return Interception::Intercepted(self.help_text(invocation.args));
        }
        match self.magics.get(invocation.name) {
            Some(magic) => {
                log::debug!("running magic %{}", invocation.name);
                magic.run(&invocation, context)
            }
            None => Interception::Intercepted(MagicResponse::error(format!(
                "Unknown magic %{}. Use %help to list magics.\n",
                invocation.name
            ))),
        }
    }

    fn help_text(&self, topic: &str) -> MagicResponse {
        if !topic.is_empty() {
            let topic = topic.trim_start_matches('%');
            return match self.magics.get(topic) {
                Some(magic) => MagicResponse::ok(format!("%{}: {}\n", magic.name(), magic.summary())),
                None => MagicResponse::error(format!("Unknown magic %{topic}\n")),
            };
        }
        let mut text = String::from("Available magics:\n");
        for magic in self.magics.values() {
            text.push_str(&format!("  %{:<10} {}\n", magic.name(), magic.summary()));
        }
        text.push_str(&format!("  %{HELP:<10} list magics, or describe one: %help time\n"));
        MagicResponse::ok(text)
    }
}

/// Split a leading `%name args` line from the submission
#[must_use]
pub fn parse_invocation(text: &str) -> Option<MagicInvocation<'_>> {
    let trimmed = text.trim_start();
    let caps = MAGIC_RE.captures(trimmed)?;
    let whole = caps.get(0)?;
    Some(MagicInvocation {
        name: caps.get(1)?.as_str(),
        args: caps.get(2).map_or("", |m| m.as_str().trim_end()),
        body: &trimmed[whole.end()..],
    })
}

struct DelimitMagic;

impl Magic for DelimitMagic {
    fn name(&self) -> &'static str {
        "delimit"
    }

    fn summary(&self) -> &'static str {
        "show the delimiter in effect"
    }

    fn run(&self, _invocation: &MagicInvocation<'_>, context: &mut MagicContext) -> Interception {
        Interception::Intercepted(MagicResponse::ok(format!(
            "The delimiter is currently: {}\n",
            context.mode
        )))
    }
}

struct StatusMagic;

impl Magic for StatusMagic {
    fn name(&self) -> &'static str {
        "status"
    }

    fn summary(&self) -> &'static str {
        "show session state"
    }

    fn run(&self, _invocation: &MagicInvocation<'_>, context: &mut MagicContext) -> Interception {
        let timeout = context
            .statement_timeout_secs
            .map_or_else(|| "none".to_string(), |secs| format!("{secs}s"));
        Interception::Intercepted(MagicResponse::ok(format!(
            "session: {}\ndelimiter: {}\nexecution count: {}\nerror policy: {}\nstatement timeout: {timeout}\n",
            if context.session_alive { "alive" } else { "dead" },
            context.mode,
            context.execution_count,
            context.error_policy,
        )))
    }
}

struct TimeMagic;

impl Magic for TimeMagic {
    fn name(&self) -> &'static str {
        "time"
    }

    fn summary(&self) -> &'static str {
        "run the code and report elapsed time"
    }

    fn run(&self, invocation: &MagicInvocation<'_>, _context: &mut MagicContext) -> Interception {
        let code = if invocation.args.is_empty() {
            invocation.body.to_string()
        } else if invocation.body.is_empty() {
            invocation.args.to_string()
        } else {
            format!("{}\n{}", invocation.args, invocation.body)
        };
        if code.trim().is_empty() {
            return Interception::Intercepted(MagicResponse::error("%time needs code to run\n"));
        }
        Interception::Continue {
            code,
            post: vec![PostAction::ReportElapsed {
                started: Instant::now(),
            }],
        }
    }
}

struct MacroMagic {
    scope: MacroScope,
}

impl Magic for MacroMagic {
    fn name(&self) -> &'static str {
        match self.scope {
            MacroScope::Local => "locals",
            MacroScope::Global => "globals",
        }
    }

    fn summary(&self) -> &'static str {
        match self.scope {
            MacroScope::Local => "list local macros, optionally matching a pattern",
            MacroScope::Global => "list global macros, optionally matching a pattern",
        }
    }

    fn run(&self, invocation: &MagicInvocation<'_>, _context: &mut MagicContext) -> Interception {
        if !invocation.body.trim().is_empty() {
            return Interception::Intercepted(MagicResponse::error(format!(
                "%{} takes no code after it; run that code in its own cell\n",
                self.name()
            )));
        }
        let pattern = Some(invocation.args.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Interception::Continue {
            code: "macro list".to_string(),
            post: vec![PostAction::FilterMacros {
                scope: self.scope,
                pattern,
            }],
        }
    }
}

struct SetMagic;

impl Magic for SetMagic {
    fn name(&self) -> &'static str {
        "set"
    }

    fn summary(&self) -> &'static str {
        "change a kernel setting: %set error_policy continue | %set timeout 60"
    }

    fn run(&self, invocation: &MagicInvocation<'_>, context: &mut MagicContext) -> Interception {
        let mut parts = invocation.args.split_whitespace();
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Interception::Intercepted(MagicResponse::error(
                "usage: %set <setting> <value>\n",
            ));
        };

        let response = match key {
            "error_policy" => match value.parse::<ErrorPolicy>() {
                Ok(policy) => {
                    context.error_policy = policy;
                    MagicResponse::ok(format!("error_policy set to {policy}\n"))
                }
                Err(err) => MagicResponse::error(format!("{err}\n")),
            },
            "timeout" => match value {
                "none" | "off" | "0" => {
                    context.statement_timeout_secs = None;
                    MagicResponse::ok("timeout disabled\n")
                }
                secs => match secs.parse::<u64>() {
                    Ok(secs) => {
                        context.statement_timeout_secs = Some(secs);
                        MagicResponse::ok(format!("timeout set to {secs}s\n"))
                    }
                    Err(_) => MagicResponse::error(format!("invalid timeout '{secs}'\n")),
                },
            },
            other => MagicResponse::error(format!(
                "unknown setting '{other}' (expected error_policy or timeout)\n"
            )),
        };
        Interception::Intercepted(response)
    }
}
