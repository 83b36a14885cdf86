//! External command execution
//!
//! Every change to the host goes through a [`CommandRunner`]: one external
//! tool invocation per call, run to completion before returning. The
//! production runner, [`SystemRunner`], bounds each invocation with a
//! timeout and kills the child if it overruns, since some tools can block
//! indefinitely on system IPC.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};

use crate::error::{Error, Result};

/// Default upper bound for a single external command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Synchronous capability to run one external command
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with the remaining arguments.
    ///
    /// Returns the combined stdout and stderr on success. A non-zero exit
    /// status is reported as [`Error::Command`] carrying the same output.
    fn run(&self, argv: &[String]) -> Result<String>;
}

/// Build an owned argv from string slices
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

/// Render an argv for logs and error messages
pub fn display(argv: &[String]) -> String {
    argv.join(" ")
}

/// Runs commands on the host with a per-command timeout
///
/// Owns a single-threaded tokio runtime used only to drive child processes
/// and their deadlines. Calls block the current thread, so `run` must not
/// be invoked from inside an async task.
pub struct SystemRunner {
    runtime: Runtime,
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner with [`DEFAULT_COMMAND_TIMEOUT`]
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }

    /// Create a runner with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::Config("command timeout must be non-zero".into()));
        }

        let runtime = Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;

        Ok(Self { runtime, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("empty command line".into()))?;
        let command = display(argv);

        log::debug!("Running: {}", command);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = self.timeout;
        let result = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, cmd.output()).await });

        let output = match result {
            Err(_) => {
                log::warn!("Command timed out after {:?}: {}", timeout, command);
                return Err(Error::Timeout {
                    command,
                    after: timeout,
                });
            }
            Ok(Err(source)) => return Err(Error::Spawn { command, source }),
            Ok(Ok(output)) => output,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::Command {
                command,
                code: output.status.code(),
                output: combined,
            });
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_and_display() {
        let args = argv(["route", "-q", "-n", "add"]);
        assert_eq!(args.len(), 4);
        assert_eq!(display(&args), "route -q -n add");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(SystemRunner::with_timeout(Duration::ZERO).is_err());
    }

    #[test]
    fn test_empty_argv_rejected() {
        let runner = SystemRunner::new().unwrap();
        assert!(matches!(runner.run(&[]), Err(Error::Config(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_run_success_captures_output() {
        let runner = SystemRunner::new().unwrap();
        let out = runner.run(&argv(["echo", "hello"])).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    #[cfg(unix)]
    fn test_run_failure_reports_exit_code() {
        let runner = SystemRunner::new().unwrap();
        match runner.run(&argv(["false"])) {
            Err(Error::Command { command, code, .. }) => {
                assert_eq!(command, "false");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_run_missing_binary() {
        let runner = SystemRunner::new().unwrap();
        let err = runner
            .run(&argv(["meshlink-definitely-not-installed"]))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    #[cfg(unix)]
    fn test_run_timeout_kills_child() {
        let runner = SystemRunner::with_timeout(Duration::from_millis(100)).unwrap();
        let started = std::time::Instant::now();
        let err = runner.run(&argv(["sleep", "5"])).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
