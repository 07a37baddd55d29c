//! External tool invocation.
//!
//! [`Cmd`] is a builder that produces an immutable [`ToolInvocation`]. An
//! invocation runs exactly once (it is consumed by [`ToolInvocation::run`]),
//! captures the combined output of the tool and classifies the result by exit
//! status, by failure markers in the output, and by the presence of the
//! declared output file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

/// A tool program together with leading arguments.
///
/// Configured from either `"nasm"` or `["sh", "fake-nasm.sh"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Start a [`Cmd`] for this tool with the leading arguments applied.
    pub fn cmd(&self) -> Cmd {
        Cmd::new(&self.program).args(&self.args)
    }

    /// Start a [`std::process::Command`] for long-running tools (the VM).
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Builder for a [`ToolInvocation`].
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    output: Option<PathBuf>,
    error_msg: Option<String>,
    failure_markers: Vec<String>,
    echo: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            output: None,
            error_msg: None,
            failure_markers: Vec::new(),
            echo: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// File the tool must have produced for the run to count as a success.
    pub fn output(mut self, path: &Path) -> Self {
        self.output = Some(path.to_path_buf());
        self
    }

    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Treat the run as failed when the combined output contains `marker`,
    /// even if the exit status is zero.
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.failure_markers.push(marker.into());
        self
    }

    /// Print the command line before running it.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn build(self) -> ToolInvocation {
        ToolInvocation {
            program: self.program,
            args: self.args,
            envs: self.envs,
            output: self.output,
            error_msg: self.error_msg,
            failure_markers: self.failure_markers,
            echo: self.echo,
        }
    }

    pub fn run(self) -> Result<ToolOutput> {
        self.build().run()
    }
}

/// A finalized command descriptor. Immutable; executed at most once.
#[derive(Debug)]
pub struct ToolInvocation {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    output: Option<PathBuf>,
    error_msg: Option<String>,
    failure_markers: Vec<String>,
    echo: bool,
}

/// Captured result of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut combined = String::new();
        combined.push_str(self.stdout.trim());
        if !self.stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(self.stderr.trim());
        }
        combined
    }
}

impl ToolInvocation {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    pub fn run(self) -> Result<ToolOutput> {
        let command_line = self.command_line();
        if self.echo {
            println!("{command_line}");
        }
        debug!(command = %command_line, "running tool");

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let raw = command
            .output()
            .map_err(|e| Error::tool(&self.program, format!("could not start: {e}")))?;

        let output = ToolOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };
        let combined = output.combined();

        if !raw.status.success() {
            return Err(self.failure(&format!("exited with {}", raw.status), &combined));
        }

        if let Some(marker) = self
            .failure_markers
            .iter()
            .find(|marker| combined.contains(marker.as_str()))
        {
            return Err(self.failure(&format!("reported '{marker}'"), &combined));
        }

        if let Some(path) = &self.output {
            if !path.exists() {
                return Err(self.failure(
                    &format!("did not produce '{}'", path.display()),
                    &combined,
                ));
            }
        }

        if !combined.is_empty() {
            debug!(tool = %self.program, output = %combined, "tool output");
        }
        Ok(output)
    }

    fn failure(&self, reason: &str, combined: &str) -> Error {
        let mut message = match &self.error_msg {
            Some(msg) => format!("{msg} ({reason})"),
            None => reason.to_string(),
        };
        if !combined.is_empty() {
            message.push('\n');
            message.push_str(combined);
        }
        Error::tool(&self.program, message)
    }
}
