//! Root of the `safeexec-core` library: the sandbox enforcement engine
//! behind the SafeExec broker.

// Library code must never write to the real stdout/stderr: stdout carries
// the wire protocol and stderr is reserved for tracing.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod audit;
pub mod capability;
pub mod chat;
pub mod classified;
pub mod config;
pub mod error;
pub mod exec;
pub mod filesystem;
pub mod interpreter;
pub mod net;
mod surface;
pub mod session;
pub mod validator;

pub use audit::AuditRecorder;
pub use audit::STATELESS_SESSION_ID;
pub use classified::Classified;
pub use config::ChatEndpoint;
pub use config::Config;
pub use config::ConfigOverrides;
pub use error::Result;
pub use error::SafeExecErr;
pub use error::SecurityErr;
pub use exec::ProcessResult;
pub use filesystem::GrepMatch;
pub use interpreter::ExecutionResult;
pub use session::Session;
pub use session::SessionManager;

/// Reference text for the capability surface, returned verbatim by the
/// `show_interface` tool.
pub const INTERFACE_REFERENCE: &str = include_str!("interface.md");
