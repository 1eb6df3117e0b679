use serde::{Deserialize, Serialize};
use stata_code_chunker::{ChunkPlan, Chunker, DelimiterMode, Fingerprint};

use crate::command_log::{CommandLog, LogEntry};
use crate::config::{DispatchConfig, ErrorPolicy};
use crate::error::ProcessError;
use crate::process::{ExternalProcess, ProcessResponse, SideChannelEvent};

/// Overall return code reported when the session itself failed
pub const FATAL_RETURN_CODE: i32 = -1;

/// Receives output while a plan is running
pub trait OutputSink: Send {
    /// Text produced by the statement at `position` among the executable ones
    fn output(&mut self, position: usize, text: &str);

    fn event(&mut self, event: &SideChannelEvent);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn output(&mut self, _position: usize, _text: &str) {}

    fn event(&mut self, _event: &SideChannelEvent) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatementOutcome {
    Succeeded,
    Failed { return_code: i32 },
    Fatal,
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementReport {
    /// Normalized text that was (or would have been) sent
    pub text: String,
    pub outcome: StatementOutcome,
    /// Captured output, empty when not attempted
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    /// At least one statement failed; `statement_index` is the first one
    Errored {
        return_code: i32,
        statement_index: usize,
    },
    Fatal { reason: String },
}

/// Aggregated outcome of one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub status: DispatchStatus,
    pub fingerprint: Fingerprint,
    /// One report per executable statement, in plan order
    pub statements: Vec<StatementReport>,
    pub events: Vec<SideChannelEvent>,
}

impl DispatchResult {
    /// 0 only when every statement succeeded
    #[must_use]
    pub const fn return_code(&self) -> i32 {
        match &self.status {
            DispatchStatus::Completed => 0,
            DispatchStatus::Errored { return_code, .. } => *return_code,
            DispatchStatus::Fatal { .. } => FATAL_RETURN_CODE,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, DispatchStatus::Completed)
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.status, DispatchStatus::Fatal { .. })
    }

    fn count(&self, pred: impl Fn(&StatementOutcome) -> bool) -> usize {
        self.statements.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Statements that ran to completion before the halt
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.count(|o| matches!(o, StatementOutcome::Succeeded))
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, StatementOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn not_attempted_count(&self) -> usize {
        self.count(|o| matches!(o, StatementOutcome::NotAttempted))
    }

    /// All captured output, in order
    #[must_use]
    pub fn output(&self) -> String {
        self.statements.iter().map(|r| r.output.as_str()).collect()
    }
}

/// Runs chunk plans against one external process, a statement at a time
pub struct Dispatcher<P> {
    process: P,
    config: DispatchConfig,
    chunker: Chunker,
    command_log: Option<Box<dyn CommandLog>>,
}

impl<P: ExternalProcess> Dispatcher<P> {
    pub fn new(process: P, config: DispatchConfig) -> Self {
        Self {
            process,
            config,
            chunker: Chunker::default(),
            command_log: None,
        }
    }

    #[must_use]
    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    #[must_use]
    pub fn with_command_log(mut self, log: impl CommandLog + 'static) -> Self {
        self.command_log = Some(Box::new(log));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Settings for the next dispatch; a running plan is unaffected
    pub fn config_mut(&mut self) -> &mut DispatchConfig {
        &mut self.config
    }

    pub fn process_mut(&mut self) -> &mut P {
        &mut self.process
    }

    pub fn into_process(self) -> P {
        self.process
    }

    /// Whether `text` is ready to run in `mode`. Sends nothing.
    #[must_use]
    pub fn is_complete(&self, text: &str, mode: DelimiterMode) -> bool {
        self.chunker.is_complete(text, mode)
    }

    pub async fn dispatch(&mut self, plan: &ChunkPlan) -> DispatchResult {
        self.dispatch_with(plan, &mut NullSink).await
    }

    /// Run every executable statement of `plan` in order, relaying output
    /// to `sink` as each statement finishes
    pub async fn dispatch_with(
        &mut self,
        plan: &ChunkPlan,
        sink: &mut dyn OutputSink,
    ) -> DispatchResult {
        if let Some(command_log) = &self.command_log {
            if let Err(err) = command_log.record(&LogEntry::from_plan(plan)).await {
                log::warn!("Failed to record {}: {err}", plan.fingerprint.short());
            }
        }

        let total = plan.executable_count();
        let mut statements = Vec::with_capacity(total);
        let mut events = Vec::new();
        let mut first_failure: Option<(i32, usize)> = None;
        let mut fatal: Option<String> = None;
        let mut halted = false;

        for (position, planned) in plan.executable().enumerate() {
            let text = planned.text().to_string();
            if halted {
                statements.push(StatementReport {
                    text,
                    outcome: StatementOutcome::NotAttempted,
                    output: String::new(),
                });
                continue;
            }

            log::debug!("sending statement {}/{total}", position + 1);
            match self.send(&text).await {
                Ok(ProcessResponse {
                    return_code,
                    output,
                    events: statement_events,
                }) => {
                    for event in &statement_events {
                        sink.event(event);
                    }
                    events.extend(statement_events);

                    let outcome = if return_code == 0 {
                        StatementOutcome::Succeeded
                    } else {
                        log::debug!("statement {} failed with r({return_code})", position + 1);
                        first_failure.get_or_insert((return_code, position));
                        if self.config.error_policy == ErrorPolicy::HaltOnError {
                            halted = true;
                        }
                        StatementOutcome::Failed { return_code }
                    };

                    let relay = !planned.is_silent() || return_code != 0;
                    if relay && !output.is_empty() {
                        sink.output(position, &output);
                    }
                    statements.push(StatementReport {
                        text,
                        outcome,
                        output,
                    });
                }
                Err(err) => {
                    log::error!("statement {} aborted the session: {err}", position + 1);
                    fatal = Some(err.to_string());
                    halted = true;
                    statements.push(StatementReport {
                        text,
                        outcome: StatementOutcome::Fatal,
                        output: String::new(),
                    });
                }
            }
        }

        let status = match (fatal, first_failure) {
            (Some(reason), _) => DispatchStatus::Fatal { reason },
            (None, Some((return_code, statement_index))) => DispatchStatus::Errored {
                return_code,
                statement_index,
            },
            (None, None) => DispatchStatus::Completed,
        };

        let result = DispatchResult {
            status,
            fingerprint: plan.fingerprint.clone(),
            statements,
            events,
        };
        log::debug!(
            "dispatched {}: {} ok, {} failed, {} not attempted, rc={}",
            result.fingerprint.short(),
            result.succeeded_count(),
            result.failed_count(),
            result.not_attempted_count(),
            result.return_code()
        );
        result
    }

    async fn send(&mut self, statement: &str) -> Result<ProcessResponse, ProcessError> {
        match self.config.statement_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.process.send(statement))
                .await
                .map_err(|_| ProcessError::Unresponsive { timeout: limit })?,
            None => self.process.send(statement).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use stata_code_chunker::ChunkPlanner;
    use stata_protocol::GraphFormat;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Answers from a script and remembers what it was sent
    #[derive(Default)]
    struct ScriptedProcess {
        replies: VecDeque<Result<ProcessResponse, ProcessError>>,
        sent: Vec<String>,
    }

    impl ScriptedProcess {
        fn new(replies: Vec<Result<ProcessResponse, ProcessError>>) -> Self {
            Self {
                replies: replies.into(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ExternalProcess for ScriptedProcess {
        async fn send(&mut self, statement: &str) -> Result<ProcessResponse, ProcessError> {
            self.sent.push(statement.to_string());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Ok(ProcessResponse::ok("")))
        }
    }

    struct HangingProcess;

    #[async_trait]
    impl ExternalProcess for HangingProcess {
        async fn send(&mut self, _statement: &str) -> Result<ProcessResponse, ProcessError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        output: Vec<(usize, String)>,
        events: Vec<SideChannelEvent>,
    }

    impl OutputSink for CollectingSink {
        fn output(&mut self, position: usize, text: &str) {
            self.output.push((position, text.to_string()));
        }

        fn event(&mut self, event: &SideChannelEvent) {
            self.events.push(event.clone());
        }
    }

    fn plan(text: &str) -> ChunkPlan {
        let output = Chunker::default()
            .chunk_str(text, DelimiterMode::Newline)
            .unwrap();
        ChunkPlanner::default()
            .plan(output, DelimiterMode::Newline)
            .unwrap()
    }

    #[tokio::test]
    async fn sends_statements_in_order() {
        let process = ScriptedProcess::default();
        let mut dispatcher = Dispatcher::new(process, DispatchConfig::default());

        let result = dispatcher
            .dispatch(&plan("* setup\nsysuse auto\n\nsummarize price\n"))
            .await;

        assert!(result.is_success());
        assert_eq!(result.return_code(), 0);
        assert_eq!(result.succeeded_count(), 2);
        assert_eq!(
            dispatcher.into_process().sent,
            vec!["sysuse auto".to_string(), "summarize price".to_string()]
        );
    }

    #[tokio::test]
    async fn halts_after_first_failure() {
        let process = ScriptedProcess::new(vec![
            Ok(ProcessResponse::ok("1\n")),
            Ok(ProcessResponse::failed(198, "invalid syntax\n")),
            Ok(ProcessResponse::ok("3\n")),
        ]);
        let mut dispatcher = Dispatcher::new(process, DispatchConfig::default());

        let result = dispatcher.dispatch(&plan("di 1\ndi (\ndi 3\n")).await;

        assert_eq!(
            result.status,
            DispatchStatus::Errored {
                return_code: 198,
                statement_index: 1
            }
        );
        assert_eq!(result.return_code(), 198);
        assert_eq!(result.succeeded_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.not_attempted_count(), 1);
        assert_eq!(dispatcher.into_process().sent.len(), 2);
    }

    #[tokio::test]
    async fn continue_policy_runs_everything_and_keeps_first_code() {
        let process = ScriptedProcess::new(vec![
            Ok(ProcessResponse::failed(111, "")),
            Ok(ProcessResponse::failed(198, "")),
            Ok(ProcessResponse::ok("")),
        ]);
        let config = DispatchConfig {
            error_policy: ErrorPolicy::ContinueOnError,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(process, config);

        let result = dispatcher.dispatch(&plan("a\nb\nc\n")).await;

        assert_eq!(result.return_code(), 111);
        assert_eq!(result.failed_count(), 2);
        assert_eq!(result.succeeded_count(), 1);
        assert_eq!(result.not_attempted_count(), 0);
    }

    #[tokio::test]
    async fn process_failure_is_fatal() {
        let process = ScriptedProcess::new(vec![
            Ok(ProcessResponse::ok("")),
            Err(ProcessError::Terminated),
        ]);
        let mut dispatcher = Dispatcher::new(process, DispatchConfig::default());

        let result = dispatcher.dispatch(&plan("a\nb\nc\n")).await;

        assert!(result.is_fatal());
        assert_eq!(result.return_code(), FATAL_RETURN_CODE);
        assert_eq!(
            result
                .statements
                .iter()
                .map(|r| r.outcome.clone())
                .collect::<Vec<_>>(),
            vec![
                StatementOutcome::Succeeded,
                StatementOutcome::Fatal,
                StatementOutcome::NotAttempted
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_process_times_out() {
        let config = DispatchConfig {
            statement_timeout_secs: Some(5),
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(HangingProcess, config);

        let result = dispatcher.dispatch(&plan("di 1\ndi 2\n")).await;

        assert!(result.is_fatal());
        assert_eq!(result.not_attempted_count(), 1);
        let DispatchStatus::Fatal { reason } = &result.status else {
            panic!("expected fatal, got {:?}", result.status);
        };
        assert!(reason.contains("did not respond"), "{reason}");
    }

    #[tokio::test]
    async fn silent_output_dropped_unless_failed() {
        let graph = SideChannelEvent::GraphExported {
            path: PathBuf::from("/tmp/g.svg"),
            format: GraphFormat::Svg,
        };
        let process = ScriptedProcess::new(vec![
            Ok(ProcessResponse::ok("table\n")),
            Ok(ProcessResponse::ok("echoed\n").with_event(graph.clone())),
            Ok(ProcessResponse::failed(111, "variable z not found\n")),
        ]);
        let config = DispatchConfig {
            error_policy: ErrorPolicy::ContinueOnError,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(process, config);
        let mut sink = CollectingSink::default();

        let result = dispatcher
            .dispatch_with(&plan("qui tab x\ngraph export g.svg\ncap drop z\n"), &mut sink)
            .await;

        assert_eq!(
            sink.output,
            vec![
                (1, "echoed\n".to_string()),
                (2, "variable z not found\n".to_string())
            ]
        );
        assert_eq!(sink.events, vec![graph.clone()]);
        assert_eq!(result.events, vec![graph]);
        assert_eq!(result.statements[0].output, "table\n");
    }

    #[tokio::test]
    async fn empty_plan_completes() {
        let mut dispatcher = Dispatcher::new(ScriptedProcess::default(), DispatchConfig::default());
        let result = dispatcher.dispatch(&plan("* nothing\n\n")).await;
        assert!(result.is_success());
        assert!(result.statements.is_empty());
    }

    #[test]
    fn is_complete_does_not_send() {
        let dispatcher = Dispatcher::new(ScriptedProcess::default(), DispatchConfig::default());
        assert!(!dispatcher.is_complete("if 1 {", DelimiterMode::Newline));
        assert!(dispatcher.is_complete("a ; b ;", DelimiterMode::Semicolon));
        assert!(dispatcher.into_process().sent.is_empty());
    }
}
