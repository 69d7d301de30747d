//! Hatch REPL binary: wires the Settings, Environment Manager, Registry,
//! Package Loader, and MCP Manager into one running [`ChatSession`] and
//! drives the interactive command loop of `commands`/`repl`.

mod commands;
mod log_format;
mod logging;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hatch_core::{ChatSession, EnvironmentManager, McpManager, PackageLoader, Registry, Settings};

/// Hatch: an MCP-tool-orchestrating chat runtime with a package/environment
/// manager for its tool-server fleet.
#[derive(Parser, Debug)]
#[command(name = "hatch", about = "Interactive Hatch chat REPL")]
struct Args {
    /// Directory to look for a `.env` override in, instead of the current directory.
    #[arg(long)]
    env_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let args = Args::parse();

    if let Err(e) = hatch_config::load_and_apply("hatch", args.env_dir.as_deref()) {
        eprintln!("failed to load configuration: {e}");
        return 1;
    }

    let settings = Arc::new(Settings::from_env());

    let log_buffer = match logging::init(&settings) {
        Ok(buffer) => buffer,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return 1;
        }
    };

    let envs = match EnvironmentManager::load(&settings.hatch_envs_dir) {
        Ok(envs) => envs,
        Err(e) => {
            eprintln!("failed to load environments: {e}");
            return 1;
        }
    };

    let registry = match Registry::load(&settings.hatch_registry_path) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("failed to load registry: {e}");
            return 1;
        }
    };

    let loader = PackageLoader::new(settings.hatch_cache_dir.clone());

    let mcp_manager = Arc::new(McpManager::new());
    let entry_points = match envs.server_entry_points(envs.current_name()) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("failed to read server entry points: {e}");
            return 1;
        }
    };
    for (path, err) in mcp_manager.connect_fleet(&entry_points).await {
        tracing::warn!(server = %path.display(), error = %err, "failed to connect MCP server at startup");
    }

    let mut chat = ChatSession::new(settings.clone(), mcp_manager.clone());
    chat.enable_tools();

    let mut state = repl::AppState {
        settings,
        mcp_manager,
        chat,
        envs,
        registry,
        loader,
        log_buffer,
    };

    println!("Hatch. Type 'help' for commands, 'exit' to quit.");
    repl::run(&mut state).await
}
