//! Interactive REPL loop: read stdin, dispatch a command or forward the line
//! to the Chat Session, print the reply, repeat until EOF or `exit`/`quit`.

use std::sync::Arc;

use hatch_core::{ChatSession, EnvironmentManager, McpManager, PackageLoader, Registry, Settings};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{self, Command, PkgAddArgs};
use crate::logging::LogBuffer;

/// Everything the REPL mutates across turns, bundled so `main` can build it
/// once and hand it to [`run`].
pub struct AppState {
    pub settings: Arc<Settings>,
    pub mcp_manager: Arc<McpManager>,
    pub chat: ChatSession,
    pub envs: EnvironmentManager,
    pub registry: Registry,
    pub loader: PackageLoader,
    pub log_buffer: Arc<LogBuffer>,
}

impl AppState {
    /// Drops every current MCP connection and reconnects to the current
    /// environment's entry points. Called after anything that changes which
    /// packages are installed in (or which environment is) current.
    async fn reconnect_fleet(&self) {
        self.mcp_manager.disconnect_all().await;
        let entry_points = match self.envs.server_entry_points(self.envs.current_name()) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(error = %e, "failed to read server entry points for fleet reconnect");
                return;
            }
        };
        for (path, err) in self.mcp_manager.connect_fleet(&entry_points).await {
            tracing::warn!(server = %path.display(), error = %err, "failed to connect MCP server");
        }
    }
}

/// Runs the REPL loop: prompt, read line, dispatch, print, repeat.
///
/// Exits on EOF (Ctrl+D) or `exit`/`quit`. Returns the process exit code:
/// 0 on clean termination, 1 if an unrecoverable error ended the loop early.
pub async fn run(state: &mut AppState) -> i32 {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        if std::io::Write::flush(&mut std::io::stdout()).is_err() {
            return 1;
        }

        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("error reading input: {e}");
                return 1;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match commands::parse(&line) {
            Command::Exit => break,
            Command::Help => println!("{}", commands::help_text()),
            Command::Clear => {
                state.chat.clear_history();
                println!("history cleared");
            }
            Command::ShowLogs(n) => {
                for line in state.log_buffer.tail(n.unwrap_or(20)) {
                    println!("{line}");
                }
            }
            Command::SetLogLevel(_level) => {
                println!(
                    "log level can only be changed at startup via LOG_LEVEL; restart to apply a new value"
                );
            }
            Command::EnableTools => {
                state.chat.enable_tools();
                println!("tools enabled");
            }
            Command::DisableTools => {
                state.chat.disable_tools();
                println!("tools disabled");
            }
            Command::SetMaxToolCallIterations(n) => {
                state.settings.set_max_tool_call_iteration(n);
                println!("max_tool_call_iterations set to {n}");
            }
            Command::SetMaxWorkingTime(s) => {
                state.settings.set_max_working_time_secs(s);
                println!("max_working_time set to {s}s");
            }
            Command::EnvList => {
                for env in state.envs.list() {
                    let marker = if env.name == state.envs.current_name() { "*" } else { " " };
                    println!("{marker} {}", env.name);
                }
            }
            Command::EnvCreate(name) => match state.envs.create(&name, "") {
                Ok(()) => println!("created environment {name}"),
                Err(e) => println!("error: {e}"),
            },
            Command::EnvRemove(name) => match state.envs.remove(&name) {
                Ok(()) => println!("removed environment {name}"),
                Err(e) => println!("error: {e}"),
            },
            Command::EnvCurrent => println!("{}", state.envs.current_name()),
            Command::EnvUse(name) => match state.envs.use_environment(&name) {
                Ok(()) => {
                    state.reconnect_fleet().await;
                    println!("switched to environment {name}");
                }
                Err(e) => println!("error: {e}"),
            },
            Command::PkgAdd(args) => {
                let env_name = state.envs.current_name().to_string();
                let result = match args {
                    PkgAddArgs::Local(path) => {
                        state.envs.add_package_local(&env_name, &path, &state.registry, &state.loader).await
                    }
                    PkgAddArgs::Registry { name, version } => {
                        state
                            .envs
                            .add_package_from_registry(&env_name, &name, &version, &state.registry, &state.loader)
                            .await
                    }
                };
                match result {
                    Ok(()) => {
                        state.reconnect_fleet().await;
                        println!("package installed");
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::PkgRemove(name) => {
                let env_name = state.envs.current_name().to_string();
                match state.envs.remove_package(&env_name, &name) {
                    Ok(()) => {
                        state.reconnect_fleet().await;
                        println!("removed package {name}");
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::PkgList => {
                let env_name = state.envs.current_name().to_string();
                match state.envs.list_packages(&env_name) {
                    Ok(packages) => {
                        for pkg in packages {
                            println!("{} {}", pkg.name, pkg.version);
                        }
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::HatchCreate(name) => {
                let dir = std::env::current_dir().unwrap_or_default().join(&name);
                match commands::scaffold_package(&dir, &name) {
                    Ok(()) => println!("scaffolded package at {}", dir.display()),
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::HatchValidate(path) => {
                let metadata_path = path.join("hatch_metadata.json");
                match std::fs::read_to_string(&metadata_path) {
                    Ok(text) => match serde_json::from_str::<hatch_core::PackageMetadata>(&text) {
                        Ok(metadata) => {
                            let validator = hatch_core::PermissiveValidator;
                            match hatch_core::PackageValidator::validate(&validator, &metadata) {
                                Ok(()) => println!("valid"),
                                Err(e) => println!("invalid: {e}"),
                            }
                        }
                        Err(e) => println!("invalid: could not parse hatch_metadata.json: {e}"),
                    },
                    Err(e) => println!("error reading {}: {e}", metadata_path.display()),
                }
            }
            Command::Chat(text) if text.is_empty() => continue,
            Command::Chat(text) => {
                let reply = state.chat.send_message(&text).await;
                println!("{reply}");
            }
        }
    }

    println!("bye");
    0
}
