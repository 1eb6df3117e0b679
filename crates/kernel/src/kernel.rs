use stata_code_chunker::{ChunkPlanner, Chunker, DelimiterMode};
use stata_protocol::{
    CompleteReply, ExecuteReply, ExecuteStatus, FrontendMessage, IsCompleteReply, KernelInfo,
};
use stata_session::{
    DispatchResult, DispatchStatus, Dispatcher, ExternalProcess, FileCommandLog, OutputSink,
    SideChannelEvent,
};

use crate::completions::CompletionState;
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::frontend::Frontend;
use crate::magics::{Interception, MagicContext, MagicRegistry, PostAction};

/// Where the current (or last) submission is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Received,
    /// Answered by a magic
    Intercepted,
    Tokenized,
    Planned,
    Dispatching,
    Completed,
    Errored,
    Fatal,
}

impl SubmissionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Intercepted | Self::Completed | Self::Errored | Self::Fatal
        )
    }
}

/// One Stata session seen from a notebook front-end
pub struct Kernel<P, F> {
    chunker: Chunker,
    planner: ChunkPlanner,
    dispatcher: Dispatcher<P>,
    magics: MagicRegistry,
    completions: CompletionState,
    frontend: F,
    mode: DelimiterMode,
    execution_count: u64,
    state: SubmissionState,
    alive: bool,
    last_result: Option<DispatchResult>,
}

impl<P: ExternalProcess, F: Frontend> Kernel<P, F> {
    pub fn new(process: P, frontend: F, config: KernelConfig) -> Result<Self> {
        config.validate().map_err(KernelError::InvalidConfig)?;
        let chunker = Chunker::new(config.chunker.clone())?;
        let mut dispatcher =
            Dispatcher::new(process, config.dispatch.clone()).with_chunker(chunker.clone());
        if let Some(dir) = config.command_log_dir() {
            log::debug!("command log at {}", dir.display());
            dispatcher = dispatcher.with_command_log(FileCommandLog::new(dir));
        }

        let magics = MagicRegistry::builtin();
        let completions = CompletionState::new().with_magics(magics.names());

        Ok(Self {
            chunker,
            planner: ChunkPlanner::new(config.chunker),
            dispatcher,
            magics,
            completions,
            frontend,
            mode: DelimiterMode::default(),
            execution_count: 0,
            state: SubmissionState::Idle,
            alive: true,
            last_result: None,
        })
    }

    #[must_use]
    pub fn kernel_info(&self) -> KernelInfo {
        KernelInfo::default()
    }

    #[must_use]
    pub const fn mode(&self) -> DelimiterMode {
        self.mode
    }

    #[must_use]
    pub const fn state(&self) -> SubmissionState {
        self.state
    }

    #[must_use]
    pub const fn execution_count(&self) -> u64 {
        self.execution_count
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Outcome of the last submission that reached the dispatcher
    #[must_use]
    pub const fn last_result(&self) -> Option<&DispatchResult> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub const fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    #[must_use]
    pub const fn completions(&self) -> &CompletionState {
        &self.completions
    }

    pub fn is_complete(&self, text: &str) -> IsCompleteReply {
        if self.chunker.is_complete(text, self.mode) {
            IsCompleteReply::complete()
        } else {
            IsCompleteReply::incomplete()
        }
    }

    /// Completions at `cursor_pos`, in code points
    pub fn complete(&self, text: &str, cursor_pos: usize) -> CompleteReply {
        self.completions.complete(text, cursor_pos, self.mode)
    }

    /// Run one cell. `silent` suppresses every message to the front-end.
    pub async fn execute(&mut self, text: &str, silent: bool) -> ExecuteReply {
        self.execution_count += 1;
        self.state = SubmissionState::Received;

        if !self.alive {
            self.state = SubmissionState::Fatal;
            self.emit(
                silent,
                FrontendMessage::stderr(
                    "The Stata session has ended. Restart the kernel to continue.\n",
                ),
            );
            return self.reply(ExecuteStatus::Error);
        }

        let mut context = self.magic_context();
        let (code, post) = match self.magics.intercept(text, &mut context) {
            Interception::Intercepted(response) => {
                self.apply_magic_context(&context);
                self.state = SubmissionState::Intercepted;
                for message in response.messages {
                    self.emit(silent, message);
                }
                return self.reply(response.status);
            }
            Interception::Continue { code, post } => (code, post),
        };

        let output = match self.chunker.chunk_str(&code, self.mode) {
            Ok(output) => output,
            Err(err) => {
                self.state = SubmissionState::Errored;
                self.emit(silent, FrontendMessage::stderr(format!("{err}\n")));
                return self.reply(ExecuteStatus::Error);
            }
        };
        self.state = SubmissionState::Tokenized;

        let starting_mode = self.mode;
        let plan = match self.planner.plan(output, starting_mode) {
            Ok(plan) => plan,
            Err(err) => {
                self.state = SubmissionState::Errored;
                self.emit(silent, FrontendMessage::stderr(format!("{err}\n")));
                return self.reply(ExecuteStatus::Error);
            }
        };
        self.state = SubmissionState::Planned;
        log::debug!(
            "cell {}: {} statement(s), fingerprint {}",
            self.execution_count,
            plan.executable_count(),
            plan.fingerprint.short()
        );

        self.state = SubmissionState::Dispatching;
        let capture = post.iter().any(PostAction::captures_output);
        let mut sink = FrontendSink {
            frontend: &mut self.frontend,
            silent,
            captured: capture.then(String::new),
        };
        let result = self.dispatcher.dispatch_with(&plan, &mut sink).await;
        let captured = sink.captured.take();

        self.state = match &result.status {
            DispatchStatus::Completed => SubmissionState::Completed,
            DispatchStatus::Errored { .. } => SubmissionState::Errored,
            DispatchStatus::Fatal { reason } => {
                log::error!("Stata session lost: {reason}");
                self.alive = false;
                self.emit(
                    silent,
                    FrontendMessage::stderr(format!("Stata session lost: {reason}\n")),
                );
                SubmissionState::Fatal
            }
        };

        if let Some(mut text) = captured {
            for action in &post {
                if let Some(filtered) = action.filter_output(&text) {
                    text = filtered;
                }
            }
            if !text.is_empty() {
                self.emit(silent, FrontendMessage::stdout(text));
            }
        }
        for action in &post {
            if let Some(message) = action.report() {
                self.emit(silent, message);
            }
        }

        self.mode = plan.ending_mode;
        if plan.mode_changed() {
            self.emit(
                silent,
                FrontendMessage::stdout(format!("delimiter now {}", plan.ending_mode)),
            );
        }

        if result.is_success() {
            self.completions.refresh(&code);
        }

        let status = if result.return_code() == 0 {
            ExecuteStatus::Ok
        } else {
            ExecuteStatus::Error
        };
        self.last_result = Some(result);
        self.reply(status)
    }

    fn magic_context(&self) -> MagicContext {
        MagicContext {
            mode: self.mode,
            execution_count: self.execution_count,
            session_alive: self.alive,
            error_policy: self.dispatcher.config().error_policy,
            statement_timeout_secs: self.dispatcher.config().statement_timeout_secs,
        }
    }

    fn apply_magic_context(&mut self, context: &MagicContext) {
        let config = self.dispatcher.config_mut();
        config.error_policy = context.error_policy;
        config.statement_timeout_secs = context.statement_timeout_secs;
    }

    fn emit(&mut self, silent: bool, message: FrontendMessage) {
        if !silent {
            self.frontend.send(message);
        }
    }

    const fn reply(&self, status: ExecuteStatus) -> ExecuteReply {
        ExecuteReply {
            status,
            execution_count: self.execution_count,
        }
    }
}

/// Relays dispatcher output to the front-end, or holds it for a post action
struct FrontendSink<'a, F> {
    frontend: &'a mut F,
    silent: bool,
    captured: Option<String>,
}

impl<F: Frontend> OutputSink for FrontendSink<'_, F> {
    fn output(&mut self, _position: usize, text: &str) {
        if let Some(buffer) = self.captured.as_mut() {
            buffer.push_str(text);
        } else if !self.silent {
            self.frontend.send(FrontendMessage::stdout(text));
        }
    }

    fn event(&mut self, event: &SideChannelEvent) {
        if self.silent {
            return;
        }
        let SideChannelEvent::GraphExported { path, format } = event;
        self.frontend.send(FrontendMessage::DisplayGraph {
            path: path.clone(),
            format: *format,
        });
    }
}
