use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stata_protocol::GraphFormat;
use std::path::PathBuf;

use crate::error::ProcessError;

/// Notification raised by the interpreter alongside its text output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SideChannelEvent {
    GraphExported { path: PathBuf, format: GraphFormat },
}

/// What the interpreter answered for one statement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub return_code: i32,
    pub output: String,
    pub events: Vec<SideChannelEvent>,
}

impl ProcessResponse {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            return_code: 0,
            output: output.into(),
            events: Vec::new(),
        }
    }

    pub fn failed(return_code: i32, output: impl Into<String>) -> Self {
        Self {
            return_code,
            output: output.into(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_event(mut self, event: SideChannelEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// A long-lived interpreter session driven one statement at a time.
///
/// Implementations must not return before the statement has finished; the
/// dispatcher never has more than one statement in flight.
#[async_trait]
pub trait ExternalProcess: Send {
    async fn send(&mut self, statement: &str) -> Result<ProcessResponse, ProcessError>;
}

#[async_trait]
impl<P: ExternalProcess + ?Sized> ExternalProcess for Box<P> {
    async fn send(&mut self, statement: &str) -> Result<ProcessResponse, ProcessError> {
        (**self).send(statement).await
    }
}
