use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What happens to the rest of a plan after a statement fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Remaining statements are not attempted
    #[default]
    HaltOnError,
    /// Remaining statements still run; the first failure decides the result
    ContinueOnError,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HaltOnError => f.write_str("halt_on_error"),
            Self::ContinueOnError => f.write_str("continue_on_error"),
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "halt" | "halt_on_error" => Ok(Self::HaltOnError),
            "continue" | "continue_on_error" => Ok(Self::ContinueOnError),
            other => Err(format!(
                "unknown error policy '{other}' (expected halt_on_error or continue_on_error)"
            )),
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub error_policy: ErrorPolicy,

    /// Seconds to wait for one statement before the session is declared
    /// unresponsive. `None` waits forever.
    pub statement_timeout_secs: Option<u64>,
}

impl DispatchConfig {
    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.statement_timeout_secs == Some(0) {
            return Err("statement_timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}
