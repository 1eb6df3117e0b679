use serde::{Deserialize, Serialize};

/// Configuration for chunking and planning behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Treat `program`, `mata`, `python` and `input` openers as verbatim text
    /// blocks terminated by a line holding only `end`
    pub text_blocks: bool,

    /// Stop reading at a top-level `exit` and exclude the rest of the text
    pub exclude_after_exit: bool,

    /// Run statements led by `quietly`/`capture` without echoing their output
    pub silence_quiet_prefixes: bool,

    /// Largest submission accepted, in bytes
    pub max_submission_bytes: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            text_blocks: true,
            exclude_after_exit: true,
            silence_quiet_prefixes: true,
            max_submission_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ChunkerConfig {
    /// Config that keeps every statement visible and sends the whole text,
    /// useful when replaying a do-file verbatim
    pub fn verbatim() -> Self {
        Self {
            exclude_after_exit: false,
            silence_quiet_prefixes: false,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_submission_bytes == 0 {
            return Err("max_submission_bytes must be > 0".to_string());
        }

        Ok(())
    }
}
