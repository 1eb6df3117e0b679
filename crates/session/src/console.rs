//! [`ExternalProcess`] over a Stata console's standard streams.
//!
//! Each statement is followed by `display "<marker>"`; everything the console
//! prints up to the marker line belongs to that statement.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use stata_protocol::GraphFormat;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProcessError;
use crate::process::{ExternalProcess, ProcessResponse, SideChannelEvent};

/// Command echo: `. cmd`, `> continued`
static ECHO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[.>](?: |$)").expect("valid echo regex"));

/// Numbered echo of a line inside a block, `  2. cmd`
static BLOCK_ECHO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\. (.*)$").expect("valid block echo regex"));

static RETURN_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r\((\d+)\);$").expect("valid return code regex"));

static GRAPH_WRITTEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(file (.+) written in (\w+) format\)$").expect("valid graph written regex")
});

/// `graph save`/`graph export` confirmations; datasets saved with `save` stay output
static GRAPH_SAVED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(?file (.+\.(?i:svg|png|pdf|eps|gph|tif|jpg)) saved\)?$")
        .expect("valid graph saved regex")
});

const MARKER_PREFIX: &str = "__stata_bridge_done";

pub struct ConsoleProcess<R, W> {
    reader: R,
    writer: W,
    sequence: u64,
}

impl<R, W> ConsoleProcess<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub const fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            sequence: 0,
        }
    }

    fn next_marker(&mut self) -> String {
        self.sequence += 1;
        format!("{MARKER_PREFIX}_{}__", self.sequence)
    }

    async fn read_until_marker(
        &mut self,
        statement: &str,
        marker: &str,
    ) -> Result<ProcessResponse, ProcessError> {
        let mut response = ProcessResponse::default();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(ProcessError::Terminated);
            }
            let text = line.trim_end_matches(['\r', '\n']);
            if text == marker {
                return Ok(response);
            }
            match classify(text, statement) {
                ConsoleLine::Echo => {}
                ConsoleLine::ReturnCode(rc) => response.return_code = rc,
                ConsoleLine::Event(event) => response.events.push(event),
                ConsoleLine::Output => {
                    response.output.push_str(text);
                    response.output.push('\n');
                }
            }
        }
    }
}

#[async_trait]
impl<R, W> ExternalProcess for ConsoleProcess<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, statement: &str) -> Result<ProcessResponse, ProcessError> {
        let marker = self.next_marker();
        let payload = format!("{statement}\ndisplay \"{marker}\"\n");
        self.writer.write_all(payload.as_bytes()).await?;
        self.writer.flush().await?;
        self.read_until_marker(statement, &marker).await
    }
}

enum ConsoleLine {
    Echo,
    ReturnCode(i32),
    Event(SideChannelEvent),
    Output,
}

fn classify(line: &str, statement: &str) -> ConsoleLine {
    if ECHO_RE.is_match(line) {
        return ConsoleLine::Echo;
    }
    if let Some(echoed) = BLOCK_ECHO_RE.captures(line).and_then(|caps| caps.get(1)) {
        let echoed = echoed.as_str().trim();
        if statement.lines().any(|l| l.trim() == echoed) {
            return ConsoleLine::Echo;
        }
    }
    if let Some(rc) = RETURN_CODE_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return ConsoleLine::ReturnCode(rc);
    }
    if let Some(caps) = GRAPH_WRITTEN_RE.captures(line) {
        let path = PathBuf::from(caps.get(1).map_or("", |m| m.as_str()));
        let format = GraphFormat::from_label(caps.get(2).map_or("", |m| m.as_str()));
        return ConsoleLine::Event(SideChannelEvent::GraphExported { path, format });
    }
    if let Some(caps) = GRAPH_SAVED_RE.captures(line) {
        let path = PathBuf::from(caps.get(1).map_or("", |m| m.as_str()));
        let format = GraphFormat::from_path(&path);
        return ConsoleLine::Event(SideChannelEvent::GraphExported { path, format });
    }
    ConsoleLine::Output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, AsyncReadExt, BufReader};

    #[tokio::test]
    async fn parses_output_return_code_and_graphs() {
        let transcript = concat!(
            ". di 1\n",
            "1\n",
            ". display \"__stata_bridge_done_1__\"\n",
            "__stata_bridge_done_1__\n",
            ". regress y\n",
            "variable y not found\n",
            "r(111);\n",
            ". display \"__stata_bridge_done_2__\"\n",
            "__stata_bridge_done_2__\n",
            ". graph export a.svg\n",
            "(file /tmp/a.svg written in SVG format)\n",
            "__stata_bridge_done_3__\n",
        );
        let (writer, mut sent) = duplex(4096);
        let mut process = ConsoleProcess::new(BufReader::new(transcript.as_bytes()), writer);

        let first = process.send("di 1").await.unwrap();
        assert_eq!(first, ProcessResponse::ok("1\n"));

        let second = process.send("regress y").await.unwrap();
        assert_eq!(second, ProcessResponse::failed(111, "variable y not found\n"));

        let third = process.send("graph export a.svg").await.unwrap();
        assert_eq!(
            third.events,
            vec![SideChannelEvent::GraphExported {
                path: PathBuf::from("/tmp/a.svg"),
                format: GraphFormat::Svg,
            }]
        );
        assert_eq!(third.output, "");

        drop(process);
        let mut written = String::new();
        sent.read_to_string(&mut written).await.unwrap();
        assert!(written.starts_with("di 1\ndisplay \"__stata_bridge_done_1__\"\n"));
    }

    #[tokio::test]
    async fn end_of_stream_is_terminated() {
        let (writer, _sent) = duplex(4096);
        let mut process = ConsoleProcess::new(BufReader::new(&b"1\n"[..]), writer);
        let err = process.send("di 1").await.unwrap_err();
        assert!(matches!(err, ProcessError::Terminated));
    }

    #[test]
    fn saved_graph_takes_format_from_extension() {
        let ConsoleLine::Event(SideChannelEvent::GraphExported { path, format }) =
            classify("file /tmp/g.png saved", "graph save g.png")
        else {
            panic!("expected graph event");
        };
        assert_eq!(path, PathBuf::from("/tmp/g.png"));
        assert_eq!(format, GraphFormat::Png);
        assert!(matches!(classify("file auto.dta saved", "save auto"), ConsoleLine::Output));
    }

    #[test]
    fn echo_lines_dropped() {
        let block = "forvalues i = 1/2 {\ndi `i'\n}";
        assert!(matches!(classify("> x2", block), ConsoleLine::Echo));
        assert!(matches!(classify("  2. di `i'", block), ConsoleLine::Echo));
        assert!(matches!(classify("  1. | 4099 |", block), ConsoleLine::Output));
        assert!(matches!(classify(".", block), ConsoleLine::Echo));
        assert!(matches!(classify("1.5", block), ConsoleLine::Output));
        assert!(matches!(classify("r(198);", block), ConsoleLine::ReturnCode(198)));
        assert!(matches!(classify("r(198)", block), ConsoleLine::Output));
    }
}
