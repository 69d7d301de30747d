//! Crate-wide error taxonomy.
//!
//! One `thiserror` enum per component family, plus [`HatchError`] which
//! composes them for call sites that need to bubble an error out of
//! [`crate::chat_session::ChatSession::send_message`].

use thiserror::Error;

/// Errors from one MCP Client's connection-manager task (C1).
#[derive(Debug, Error, Clone)]
pub enum ClientError {
    /// Operation issued while the Client was not `Connected`.
    #[error("not connected")]
    NotConnected,
    /// `connect` did not finish within its 30 s budget.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
    /// `connect` failed for a reason other than timeout.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// Requested tool name is not present on this Client.
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    /// A tool call exceeded its 30 s per-call budget.
    #[error("tool call timed out: {0}")]
    ToolTimeout(String),
    /// The underlying MCP session reported a transport-level failure.
    #[error("mcp transport error: {0}")]
    Transport(String),
    /// The connection-manager task is gone (process exited, channel closed).
    #[error("connection-manager task is not running")]
    ManagerGone,
}

/// Errors from the MCP Manager's fleet operations (C2).
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("server path does not exist or is not a file: {0}")]
    InvalidServerPath(String),
    #[error("tool not found in fleet: {0}")]
    ToolNotFound(String),
    #[error("duplicate tool name across fleet: {0}")]
    DuplicateTool(String),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Errors from the LLM API Manager (C4).
#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-2xx HTTP response; `body` is the raw response for diagnosis.
    #[error("llm transport error: status {status}, body: {body}")]
    Transport { status: u16, body: String },
    /// Request could not be sent at all (DNS, connect refused, etc).
    #[error("llm request failed: {0}")]
    Request(String),
}

/// Errors from the Tool Execution Manager / chain controller (C5).
#[derive(Debug, Error)]
pub enum ToolExecError {
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Errors from the Dependency Resolver (C9).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Constraint text did not match `<op><version>`.
    #[error("unparseable version constraint: {0}")]
    DependencyConstraint(String),
    /// Walking `base_version` reached a version id absent from the package.
    #[error("registry corruption: base_version {missing} referenced by {version} does not exist")]
    RegistryCorruption { version: String, missing: String },
}

/// Errors from the Registry Store (C10).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file: {0}")]
    Read(std::io::Error),
    #[error("failed to parse registry json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to write registry file: {0}")]
    Write(std::io::Error),
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),
    #[error("package not found: {0}")]
    PackageNotFound(String),
    #[error("version not found: {0}@{1}")]
    VersionNotFound(String, String),
    #[error("package metadata failed validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

/// Errors from the Environment Manager (C7).
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid environment name: {0} (must be alphanumeric or '_')")]
    InvalidName(String),
    #[error("environment already exists: {0}")]
    AlreadyExists(String),
    #[error("environment not found: {0}")]
    NotFound(String),
    #[error("the default environment cannot be removed")]
    CannotRemoveDefault,
    /// A Hatch dependency reachable from a package being installed forms a
    /// cycle; `path` is the cycle as reported by [`crate::resolver::check_cycle`].
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },
    #[error("failed to read environments file: {0}")]
    Read(std::io::Error),
    #[error("failed to write environments file: {0}")]
    Write(std::io::Error),
    #[error("failed to parse environments json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from the Package Loader (C8).
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("extraction failed: {0}")]
    Extract(String),
    #[error("copy failed: {0}")]
    Copy(std::io::Error),
}

/// Top-level error composing every component family; propagates out of
/// [`crate::chat_session::ChatSession::send_message`]
#[derive(Debug, Error)]
pub enum HatchError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    ToolExec(#[from] ToolExecError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}
