//! Error taxonomy for a single execution.
//!
//! Every variant is local to one request and ends up as the `error` field of
//! an [`ExecutionResponse`](crate::engine::ExecutionResponse).

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Why a build or run step did not succeed.
#[derive(Debug, Error)]
pub enum StepFailure {
    /// The process ran to completion with a non-success status
    /// (non-zero exit code or terminated by a signal).
    #[error("{0}")]
    Exited(ExitStatus),

    /// The shared deadline expired; the process (group) was killed.
    #[error("timeout: process killed after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read output: {0}")]
    Io(#[source] std::io::Error),
}

impl StepFailure {
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// A failed step together with whatever output it produced before failing.
#[derive(Debug)]
pub struct StepError {
    pub failure: StepFailure,
    pub output: Vec<u8>,
}

impl StepError {
    pub const fn new(failure: StepFailure, output: Vec<u8>) -> Self {
        Self { failure, output }
    }

    /// Captured output as text (lossy UTF-8).
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Terminal error for one execution request.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Unknown language identifier. No workspace was created.
    #[error("Unsupported language")]
    UnsupportedLanguage(String),

    /// The workspace directory could not be created.
    #[error("Failed to create execution directory")]
    WorkspaceCreate(#[source] std::io::Error),

    /// The source file could not be written.
    #[error("Failed to write code file")]
    SourceWrite(#[source] std::io::Error),

    /// Compiler or syntax check failed; carries its diagnostics.
    #[error("Compilation error: {}\n{}", .0.failure, .0.output_lossy())]
    Build(StepError),

    /// The program itself failed; carries the output captured before failure.
    #[error("Execution error: {}\n{}", .0.failure, .0.output_lossy())]
    Run(StepError),
}

impl ExecError {
    /// True for failures of the engine rather than of the submitted program.
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::WorkspaceCreate(_) | Self::SourceWrite(_))
    }

    /// Terminal state of the request, for logging.
    pub const fn state(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::WorkspaceCreate(_) | Self::SourceWrite(_) => "infrastructure_failed",
            Self::Build(_) => "build_failed",
            Self::Run(_) => "run_failed",
        }
    }

    /// Output captured from the failing step, if any step ran.
    pub fn captured_output(&self) -> Option<&[u8]> {
        match self {
            Self::Build(step) | Self::Run(step) => Some(&step.output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn build_error_message_has_prefix_and_output() {
        let err = ExecError::Build(StepError::new(
            StepFailure::TimedOut(Duration::from_secs(10)),
            b"main.cpp:1: error: expected ';'".to_vec(),
        ));
        let msg = err.to_string();
        assert!(msg.starts_with("Compilation error: timeout"));
        assert!(msg.ends_with("\nmain.cpp:1: error: expected ';'"));
    }

    #[test]
    fn run_error_keeps_partial_output() {
        let err = ExecError::Run(StepError::new(
            StepFailure::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")),
            b"partial".to_vec(),
        ));
        assert_eq!(
            err.to_string(),
            "Execution error: failed to read output: pipe closed\npartial"
        );
        assert_eq!(err.captured_output(), Some(&b"partial"[..]));
    }

    #[test]
    fn infrastructure_messages_are_fixed() {
        let create = ExecError::WorkspaceCreate(io::Error::from(io::ErrorKind::PermissionDenied));
        let write = ExecError::SourceWrite(io::Error::from(io::ErrorKind::Other));
        assert_eq!(create.to_string(), "Failed to create execution directory");
        assert_eq!(write.to_string(), "Failed to write code file");
        assert!(create.is_infrastructure());
        assert!(create.captured_output().is_none());
    }

    #[test]
    fn unsupported_language_message() {
        let err = ExecError::UnsupportedLanguage("cobol".to_string());
        assert_eq!(err.to_string(), "Unsupported language");
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn spawn_failure_names_program() {
        let failure = StepFailure::Spawn {
            program: "g++".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(
            failure.to_string(),
            "failed to spawn g++: No such file or directory"
        );
        assert!(!failure.is_timeout());
    }
}
