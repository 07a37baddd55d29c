//! Error taxonomy for the build pipeline and the VM test harness.
//!
//! Every variant is fatal: a failed step aborts the current build or session
//! and nothing is retried.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the build pipeline and the VM test harness.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or contradictory build configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external tool exited non-zero, reported failure in its output, or
    /// did not produce the artifact it was asked for.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// An input artifact was absent when staging a package.
    #[error("packaging error: {0}")]
    Packaging(String),

    /// Handshake or command/reply shape violation on the monitor channel.
    #[error("monitor protocol error: {0}")]
    Protocol(String),

    /// Screenshot mismatch or missing reference image.
    #[error("screenshot comparison failed: {0}")]
    Comparison(String),

    /// The VM did not finish within the given bound and was killed.
    #[error("VM did not finish within {}s and was killed", .0.as_secs())]
    Timeout(Duration),

    /// The VM exited on its own with a non-zero status.
    #[error("VM exited with status {code}")]
    VmExit { code: i32 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(area: &str, key: &str) -> Self {
        Self::Config(format!("missing field `{key}` in [{area}]"))
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code surfaced to the caller.
    ///
    /// A VM that exited non-zero keeps its own code; everything else is `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::VmExit { code } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// Attach a context string to `std::io` failures.
pub trait IoContext<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;

    /// Shorthand for "<action> '<path>'".
    fn path_context(self, action: &str, path: &Path) -> Result<T>
    where
        Self: Sized,
    {
        self.io_context(|| format!("{action} '{}'", path.display()))
    }
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::io(context(), source))
    }
}
