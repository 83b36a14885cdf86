//! Error types for meshlink-netcfg

use std::io;
use std::net::AddrParseError;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for network configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling host network state
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A `nameserver` line carried an address that does not parse
    #[error("invalid nameserver in {line:?}: {source}")]
    InvalidNameserver {
        line: String,
        #[source]
        source: AddrParseError,
    },

    /// A search domain is not a valid DNS suffix
    #[error("invalid search domain {domain:?}: {reason}")]
    InvalidSearchDomain { domain: String, reason: String },

    /// External tool exited unsuccessfully
    #[error("command `{command}` failed ({}): {}", exit_status(*code), output.trim())]
    Command {
        command: String,
        code: Option<i32>,
        output: String,
    },

    /// External tool could not be started
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// External tool did not finish in time and was killed
    #[error("command `{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// DNS reconfiguration failed after addresses and routes were applied
    #[error("dns set: {0}")]
    Dns(#[source] Box<Error>),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse a settings file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Operation not supported on this platform
    #[error("operation not supported: {0}")]
    NotSupported(String),
}

fn exit_status(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    /// Check if the error is a not-found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Error::Spawn { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if retrying the same operation later may succeed
    ///
    /// Tool failures and timeouts depend on live OS state that can change
    /// between calls; parse and configuration errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Command { .. } | Error::Timeout { .. } | Error::Spawn { .. } => true,
            Error::Io(e) => e.kind() != io::ErrorKind::PermissionDenied,
            Error::Dns(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

/// Collects the first error of a batch of independent operations
///
/// Every operation in the batch is still attempted; later failures are
/// logged by the caller and dropped here.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    first: Option<Error>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one operation
    pub fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            if self.first.is_none() {
                self.first = Some(e);
            }
        }
    }

    /// Whether no failure has been recorded so far
    pub fn is_ok(&self) -> bool {
        self.first.is_none()
    }

    pub fn finish(self) -> Result<()> {
        match self.first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
