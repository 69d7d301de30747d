//! # hatch-core
//!
//! Core runtime for Hatch: an MCP-tool-orchestrating chat session backed by a
//! streaming LLM, plus the package tooling that keeps a local MCP tool-server
//! fleet installed and versioned.
//!
//! ## Design principles
//!
//! - **Single-owner connections**: every MCP subprocess is owned by exactly
//!   one connection-manager task, reached through an operation queue
//!   ([`mcp::McpClient`]) — the task that opens a session is the only one
//!   that ever closes it.
//! - **Explicit budgets, not recursion**: the tool-call chain controller
//!   ([`tool_exec::ToolExecManager`]) is a loop bounded by an iteration count
//!   and a wall-clock budget, never unbounded recursion.
//! - **Differential package versions**: the registry stores each version as
//!   a diff against its predecessor; full dependency sets are reconstructed
//!   by walking the chain ([`registry::Registry::get_full_package_dependencies`]).
//!
//! ## Main modules
//!
//! - [`mcp`]: MCP Client ([`mcp::McpClient`]), MCP Manager ([`mcp::McpManager`]),
//!   Tool-Schema Adapter ([`mcp::build_ollama_schema`], [`mcp::build_openai_schema`]).
//! - [`llm`]: API Manager ([`llm::ApiManager`]) and stream decoders
//!   ([`llm::OllamaDecoder`], [`llm::OpenAiDecoder`]).
//! - [`tool_exec`]: chain controller ([`tool_exec::ToolExecManager`]).
//! - [`chat_session`]: [`chat_session::ChatSession`], the top-level per-user
//!   conversation driver.
//! - [`env_manager`]: named environments of installed packages
//!   ([`env_manager::EnvironmentManager`]).
//! - [`registry`]: on-disk package registry ([`registry::Registry`]).
//! - [`resolver`]: dependency constraint parsing, transitive resolution, and
//!   cycle detection ([`resolver::resolve_dependencies`], [`resolver::check_cycle`]).
//! - [`loader`]: local copy and remote download+cache of package trees
//!   ([`loader::PackageLoader`], [`loader::install_local`]).
//! - [`settings`]: layered process configuration ([`settings::Settings`]).
//! - [`validator`]: the external package-metadata validation seam
//!   ([`validator::PackageValidator`]).
//! - [`message`]: [`message::Message`], [`message::ToolCall`], [`message::ToolResult`].
//! - [`error`]: one `thiserror` enum per component family, composed into
//!   [`error::HatchError`].

pub mod chat_session;
pub mod env_manager;
pub mod error;
pub mod llm;
pub mod loader;
pub mod mcp;
pub mod message;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod tool_exec;
pub mod validator;

pub use chat_session::ChatSession;
pub use env_manager::{Environment, EnvironmentManager, InstalledPackage, PackageSource, DEFAULT_ENVIRONMENT};
pub use error::{
    ClientError, EnvError, HatchError, LlmError, LoaderError, ManagerError, RegistryError,
    ResolverError, ToolExecError,
};
pub use llm::{ApiManager, OllamaDecoder, OpenAiDecoder, StreamDecoder, StreamOutcome, ToolDispatcher};
pub use loader::{install_local, PackageLoader};
pub use mcp::{
    build_ollama_schema, build_openai_schema, build_tool_response, normalize_tool_call_delta,
    Citations, ClientState, FakeToolServer, McpClient, McpClientHandle, McpManager, ToolCallDelta,
    ToolServer, ToolSpec,
};
pub use message::{LimitReason, Message, ToolCall, ToolResult};
pub use registry::{
    HatchDependency, Package, PackageMetadata, PythonDependency, Registry, RegistryStats,
    Repository, ResolvedDependencies, Version as RegistryVersion,
};
pub use resolver::{
    check_cycle, latest_satisfying, merge_python_constraints_last_writer_wins, parse_constraint,
    resolve_dependencies, satisfies, Constraint, ConstraintOp, CycleReport, Resolved,
    Version as ResolverVersion,
};
pub use settings::{LlmProvider, Settings};
pub use tool_exec::{ChainOutcome, ChainState, ToolExecManager};
pub use validator::{PackageValidator, PermissiveValidator};

/// When running `cargo test -p hatch-core`, initializes tracing from
/// `RUST_LOG` so unit tests can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
