use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SafeExecErr>;

/// A capability contract was breached. Every variant is surfaced inside the
/// interpreter as `SecurityException: <reason>` so that snippets can observe
/// the denial without the broker crashing.
#[derive(Error, Debug)]
pub enum SecurityErr {
    #[error("path escapes sandbox root: {path}")]
    PathEscape { path: PathBuf },

    #[error("path rejected by filesystem predicate: {path}")]
    PredicateRejected { path: PathBuf },

    #[error("classified path requires read_classified/write_classified: {path}")]
    ClassifiedPath { path: PathBuf },

    #[error("classified operation on a non-classified path: {path}")]
    NotClassifiedPath { path: PathBuf },

    #[error("command not in allowlist: {command}")]
    CommandNotAllowed { command: String },

    #[error("file commands are blocked in strict mode: {command}")]
    StrictModeCommand { command: String },

    #[error("host not in allowlist: {host}")]
    HostNotAllowed { host: String },

    #[error("capability used outside its granting scope")]
    Revoked,

    #[error("side effects are not permitted inside a classified transform")]
    PureContext,
}

/// Runtime error taxonomy for the sandbox engine. Capability denials are a
/// nested [`SecurityErr`]; everything else is a plain runtime failure that is
/// captured into the snippet's `ExecutionResult`.
#[derive(Error, Debug)]
pub enum SafeExecErr {
    #[error(transparent)]
    Security(#[from] SecurityErr),

    /// The child process outlived its deadline and was forcibly terminated.
    #[error("command `{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("chat endpoint is not configured")]
    ChatNotConfigured,

    #[error("no session with id: {0}")]
    SessionNotFound(String),

    #[error("chat endpoint returned an unusable response: {0}")]
    ChatResponse(String),

    #[error("invalid pattern: {0}")]
    Pattern(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SafeExecErr {
    /// Render this error the way it appears inside a snippet: security
    /// denials as `SecurityException`, everything else as
    /// `RuntimeException`.
    pub fn script_message(&self) -> String {
        match self {
            SafeExecErr::Security(e) => format!("SecurityException: {e}"),
            other => format!("RuntimeException: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_errors_render_as_security_exception() {
        let err = SafeExecErr::from(SecurityErr::HostNotAllowed {
            host: "example.com".to_string(),
        });
        assert_eq!(
            err.script_message(),
            "SecurityException: host not in allowlist: example.com"
        );
    }

    #[test]
    fn chat_not_configured_mentions_not_configured() {
        let err = SafeExecErr::ChatNotConfigured;
        assert!(err.script_message().contains("not configured"));
    }

    #[test]
    fn timeout_names_command_and_deadline() {
        let err = SafeExecErr::Timeout {
            command: "sleep".to_string(),
            timeout_ms: 250,
        };
        let msg = err.script_message();
        assert!(msg.contains("sleep"));
        assert!(msg.contains("250"));
    }
}
