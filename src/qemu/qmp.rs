//! QEMU Machine Protocol (QMP) client over a pair of byte streams.
//!
//! Line-delimited JSON. The channel must complete [`ControlChannel::handshake`]
//! before any other command is accepted, and at most one command is in flight
//! at a time. Asynchronous event lines (`{"event": ...}`) arriving while a
//! reply is awaited are skipped.

use std::io::{BufRead, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::error::{Error, Result};

/// Top-level key of the greeting banner.
pub const GREETING_KEY: &str = "QMP";
/// Top-level key marking an asynchronous event.
pub const EVENT_KEY: &str = "event";

/// A QMP command line.
#[derive(Debug, Clone, Serialize)]
pub struct QmpCommand {
    pub execute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl QmpCommand {
    pub fn new(execute: &str) -> Self {
        Self {
            execute: execute.to_string(),
            arguments: None,
        }
    }

    pub fn with_arguments(execute: &str, arguments: Value) -> Self {
        Self {
            execute: execute.to_string(),
            arguments: Some(arguments),
        }
    }

    pub fn capabilities() -> Self {
        Self::new("qmp_capabilities")
    }

    pub fn screendump(filename: &Path) -> Self {
        Self::with_arguments(
            "screendump",
            json!({ "filename": filename.display().to_string() }),
        )
    }
}

/// `{"return": {}}`
pub fn empty_success() -> Value {
    json!({ "return": {} })
}

/// Request/response pair talking to the VM monitor.
pub struct ControlChannel<R, W> {
    reader: R,
    writer: W,
    capabilities_negotiated: bool,
}

impl<R: BufRead, W: Write> ControlChannel<R, W> {
    /// `reader` carries monitor output, `writer` carries commands.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            capabilities_negotiated: false,
        }
    }

    pub fn capabilities_negotiated(&self) -> bool {
        self.capabilities_negotiated
    }

    /// Read the greeting, negotiate capabilities, expect the empty success.
    pub fn handshake(&mut self) -> Result<()> {
        let greeting = self.read_message()?;
        if greeting.get(GREETING_KEY).is_none() {
            return Err(Error::Protocol(format!(
                "expected a {GREETING_KEY} greeting, got {greeting}"
            )));
        }

        self.write_command(&QmpCommand::capabilities())?;
        let reply = self.read_message()?;
        expect_empty_success("qmp_capabilities", &reply)?;

        self.capabilities_negotiated = true;
        Ok(())
    }

    /// Send one command and return its reply, skipping interleaved events.
    pub fn send_command(&mut self, command: &QmpCommand) -> Result<Value> {
        if !self.capabilities_negotiated {
            return Err(Error::Protocol(format!(
                "'{}' sent before the capabilities handshake",
                command.execute
            )));
        }
        self.write_command(command)?;
        loop {
            let message = self.read_message()?;
            if message.get(EVENT_KEY).is_some() {
                trace!(%message, "skipping monitor event");
                continue;
            }
            return Ok(message);
        }
    }

    /// Capture the display into `filename` (PPM).
    pub fn screendump(&mut self, filename: &Path) -> Result<()> {
        let reply = self.send_command(&QmpCommand::screendump(filename))?;
        expect_empty_success("screendump", &reply)
    }

    fn write_command(&mut self, command: &QmpCommand) -> Result<()> {
        let line = serde_json::to_string(command)
            .map_err(|e| Error::Protocol(format!("encoding '{}': {e}", command.execute)))?;
        trace!(%line, "monitor <-");
        writeln!(self.writer, "{line}")
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::io("writing to monitor", e))
    }

    fn read_message(&mut self) -> Result<Value> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| Error::io("reading from monitor", e))?;
        if read == 0 {
            return Err(Error::Protocol("monitor closed the channel".to_string()));
        }
        trace!(line = line.trim_end(), "monitor ->");
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Protocol(format!("malformed monitor line {:?}: {e}", line.trim())))
    }
}

fn expect_empty_success(command: &str, reply: &Value) -> Result<()> {
    if *reply != empty_success() {
        return Err(Error::Protocol(format!(
            "'{command}' expected {}, got {reply}",
            empty_success()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const GREETING: &str =
        r#"{"QMP": {"version": {"qemu": {"micro": 0, "minor": 2, "major": 8}}, "capabilities": []}}"#;

    fn channel(lines: &[&str]) -> ControlChannel<Cursor<Vec<u8>>, Vec<u8>> {
        let mut input = lines.join("\n");
        input.push('\n');
        ControlChannel::new(Cursor::new(input.into_bytes()), Vec::new())
    }

    fn sent(channel: &ControlChannel<Cursor<Vec<u8>>, Vec<u8>>) -> Vec<Value> {
        String::from_utf8_lossy(&channel.writer)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_handshake() {
        let mut ch = channel(&[GREETING, r#"{"return": {}}"#]);
        ch.handshake().unwrap();
        assert!(ch.capabilities_negotiated());
        assert_eq!(sent(&ch), vec![json!({"execute": "qmp_capabilities"})]);
    }

    #[test]
    fn test_handshake_rejects_bad_greeting() {
        let mut ch = channel(&[r#"{"hello": 1}"#, r#"{"return": {}}"#]);
        assert!(matches!(ch.handshake(), Err(Error::Protocol(_))));
        assert!(!ch.capabilities_negotiated());
    }

    #[test]
    fn test_handshake_rejects_non_empty_reply() {
        let mut ch = channel(&[GREETING, r#"{"return": {"x": 1}}"#]);
        assert!(matches!(ch.handshake(), Err(Error::Protocol(_))));

        let mut ch = channel(&[GREETING, r#"{"error": {"class": "GenericError"}}"#]);
        assert!(matches!(ch.handshake(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_handshake_rejects_eof_and_garbage() {
        let mut ch = channel(&[GREETING]);
        assert!(matches!(ch.handshake(), Err(Error::Protocol(_))));

        let mut ch = channel(&["not json"]);
        assert!(matches!(ch.handshake(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_command_before_handshake() {
        let mut ch = channel(&[r#"{"return": {}}"#]);
        let err = ch.send_command(&QmpCommand::new("query-status")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(ch.writer.is_empty());
    }

    #[test]
    fn test_screendump_skips_events() {
        let mut ch = channel(&[
            GREETING,
            r#"{"return": {}}"#,
            r#"{"event": "RESUME", "timestamp": {"seconds": 1, "microseconds": 2}}"#,
            r#"{"return": {}}"#,
        ]);
        ch.handshake().unwrap();
        ch.screendump(Path::new("/tmp/screenshot.ppm")).unwrap();

        let commands = sent(&ch);
        assert_eq!(
            commands[1],
            json!({"execute": "screendump", "arguments": {"filename": "/tmp/screenshot.ppm"}})
        );
    }

    #[test]
    fn test_screendump_error_reply() {
        let mut ch = channel(&[
            GREETING,
            r#"{"return": {}}"#,
            r#"{"error": {"class": "GenericError", "desc": "no display"}}"#,
        ]);
        ch.handshake().unwrap();
        let err = ch.screendump(Path::new("shot.ppm")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
