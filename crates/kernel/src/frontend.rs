use stata_protocol::{FrontendMessage, StreamName};
use std::io::Write;

/// Where the kernel pushes stream text and graph notifications
pub trait Frontend: Send {
    fn send(&mut self, message: FrontendMessage);
}

/// Keeps every message, for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct RecordingFrontend {
    pub messages: Vec<FrontendMessage>,
}

impl RecordingFrontend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated text of one stream
    #[must_use]
    pub fn stream_text(&self, stream: StreamName) -> String {
        self.messages
            .iter()
            .filter_map(|message| match message {
                FrontendMessage::Stream { name, text } if *name == stream => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn stdout(&self) -> String {
        self.stream_text(StreamName::Stdout)
    }

    #[must_use]
    pub fn stderr(&self) -> String {
        self.stream_text(StreamName::Stderr)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Frontend for RecordingFrontend {
    fn send(&mut self, message: FrontendMessage) {
        self.messages.push(message);
    }
}

/// Writes streams to the process stdout/stderr and graphs as a path line
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutFrontend;

impl Frontend for StdoutFrontend {
    fn send(&mut self, message: FrontendMessage) {
        let result = match message {
            FrontendMessage::Stream {
                name: StreamName::Stdout,
                text,
            } => write_all(&mut std::io::stdout().lock(), &text),
            FrontendMessage::Stream {
                name: StreamName::Stderr,
                text,
            } => write_all(&mut std::io::stderr().lock(), &text),
            FrontendMessage::DisplayGraph { path, format } => {
                let line = format!("[graph {}: {}]\n", format_label(format), path.display());
                write_all(&mut std::io::stdout().lock(), &line)
            }
        };
        if let Err(err) = result {
            log::warn!("Failed to write to terminal: {err}");
        }
    }
}

fn write_all(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

fn format_label(format: stata_protocol::GraphFormat) -> &'static str {
    use stata_protocol::GraphFormat;

    match format {
        GraphFormat::Svg => "svg",
        GraphFormat::Png => "png",
        GraphFormat::Pdf => "pdf",
        GraphFormat::Eps => "eps",
        GraphFormat::Other => "file",
    }
}
