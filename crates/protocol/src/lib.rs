//! Front-end contract for the Stata bridge kernel.
//!
//! Reply and message shapes exchanged with a notebook front-end. Every type
//! derives `JsonSchema` so front-ends can validate what the kernel emits.

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const PROTOCOL_VERSION: &str = "5.3";

/// Indentation hint returned while a submission is still open
pub const CONTINUATION_INDENT: &str = "    ";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ExecuteReply {
    pub status: ExecuteStatus,
    pub execution_count: u64,
}

impl ExecuteReply {
    #[must_use]
    pub const fn ok(execution_count: u64) -> Self {
        Self {
            status: ExecuteStatus::Ok,
            execution_count,
        }
    }

    #[must_use]
    pub const fn error(execution_count: u64) -> Self {
        Self {
            status: ExecuteStatus::Error,
            execution_count,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ExecuteStatus::Ok
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IsCompleteStatus {
    Complete,
    Incomplete,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct IsCompleteReply {
    pub status: IsCompleteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent: Option<String>,
}

impl IsCompleteReply {
    #[must_use]
    pub const fn complete() -> Self {
        Self {
            status: IsCompleteStatus::Complete,
            indent: None,
        }
    }

    #[must_use]
    pub fn incomplete() -> Self {
        Self {
            status: IsCompleteStatus::Incomplete,
            indent: Some(CONTINUATION_INDENT.to_string()),
        }
    }
}

/// Completion candidates replacing `cursor_start..cursor_end` (code points)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default, JsonSchema)]
pub struct CompleteReply {
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub matches: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    Svg,
    Png,
    Pdf,
    Eps,
    Other,
}

impl GraphFormat {
    /// Map the format word the interpreter prints (`SVG`, `png`, ...)
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "svg" => Self::Svg,
            "png" => Self::Png,
            "pdf" => Self::Pdf,
            "eps" => Self::Eps,
            _ => Self::Other,
        }
    }

    /// Guess the format from a file extension
    #[must_use]
    pub fn from_path(path: &std::path::Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(Self::Other, Self::from_label)
    }
}

/// Asynchronous messages pushed to the front-end during execution
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrontendMessage {
    Stream { name: StreamName, text: String },
    DisplayGraph { path: PathBuf, format: GraphFormat },
}

impl FrontendMessage {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Stream {
            name: StreamName::Stderr,
            text: text.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct LanguageInfo {
    pub name: String,
    pub mimetype: String,
    pub file_extension: String,
    pub codemirror_mode: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct KernelInfo {
    pub protocol_version: String,
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
}

impl Default for KernelInfo {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            implementation: "stata_bridge".to_string(),
            implementation_version: env!("CARGO_PKG_VERSION").to_string(),
            language_info: LanguageInfo {
                name: "stata".to_string(),
                mimetype: "text/x-stata".to_string(),
                file_extension: ".do".to_string(),
                codemirror_mode: "stata".to_string(),
            },
            banner: "Stata bridge kernel".to_string(),
        }
    }
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}
