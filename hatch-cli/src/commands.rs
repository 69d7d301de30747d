//! REPL command surface: parses one input line into a [`Command`] and
//! dispatches it against the running session. Anything that does not match
//! a known command (or its `hatch:` namespace) is treated as a chat message.

use std::path::PathBuf;

use hatch_core::PackageMetadata;

/// One recognised REPL input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Exit,
    Clear,
    ShowLogs(Option<usize>),
    SetLogLevel(String),
    EnableTools,
    DisableTools,
    SetMaxToolCallIterations(u32),
    SetMaxWorkingTime(u64),
    EnvList,
    EnvCreate(String),
    EnvRemove(String),
    EnvCurrent,
    EnvUse(String),
    PkgAdd(PkgAddArgs),
    PkgRemove(String),
    PkgList,
    HatchCreate(String),
    HatchValidate(PathBuf),
    Chat(String),
}

/// Where a `hatch:pkg:add` argument points: a local source directory, or a
/// `name version` pair to resolve and install from the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum PkgAddArgs {
    Local(PathBuf),
    Registry { name: String, version: String },
}

const HELP_TEXT: &str = "\
Commands:
  help                                  show this text
  exit | quit                           leave the REPL
  clear                                 clear conversation history
  show_logs [N]                         print the last N log lines (default 20)
  set_log_level <lvl>                   change the live log filter
  enable_tools | disable_tools          toggle MCP tool use for this session
  set_max_tool_call_iterations <N>      per-turn tool-dispatch cap
  set_max_working_time <S>              per-turn wall-clock cap, seconds
  hatch:env:list                        list environments
  hatch:env:create <name>               create an environment
  hatch:env:remove <name>               remove an environment
  hatch:env:current                     show the current environment
  hatch:env:use <name>                  switch the current environment
  hatch:pkg:add <path>                  install a package from a local directory
  hatch:pkg:add <name> <version>        install a package from the registry
  hatch:pkg:remove <name>               remove an installed package
  hatch:pkg:list                        list packages in the current environment
  hatch:create <name>                   scaffold a new package directory
  hatch:validate <path>                 validate a package's hatch_metadata.json
Anything else is sent to the assistant as a chat message.";

pub fn help_text() -> &'static str {
    HELP_TEXT
}

/// Parses one line of REPL input. Never fails: unrecognised input becomes a
/// chat message, matching the original's "anything not a command is a
/// question" behaviour.
pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    let mut parts = trimmed.split_whitespace();
    let Some(head) = parts.next() else {
        return Command::Chat(String::new());
    };
    let rest: Vec<&str> = parts.collect();

    match head {
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        "clear" => Command::Clear,
        "show_logs" => {
            let n = rest.first().and_then(|s| s.parse().ok());
            Command::ShowLogs(n)
        }
        "set_log_level" => match rest.first() {
            Some(level) => Command::SetLogLevel(level.to_string()),
            None => Command::Chat(trimmed.to_string()),
        },
        "enable_tools" => Command::EnableTools,
        "disable_tools" => Command::DisableTools,
        "set_max_tool_call_iterations" => match rest.first().and_then(|s| s.parse().ok()) {
            Some(n) => Command::SetMaxToolCallIterations(n),
            None => Command::Chat(trimmed.to_string()),
        },
        "set_max_working_time" => match rest.first().and_then(|s| s.parse().ok()) {
            Some(s) => Command::SetMaxWorkingTime(s),
            None => Command::Chat(trimmed.to_string()),
        },
        "hatch:env:list" => Command::EnvList,
        "hatch:env:create" => match rest.first() {
            Some(name) => Command::EnvCreate(name.to_string()),
            None => Command::Chat(trimmed.to_string()),
        },
        "hatch:env:remove" => match rest.first() {
            Some(name) => Command::EnvRemove(name.to_string()),
            None => Command::Chat(trimmed.to_string()),
        },
        "hatch:env:current" => Command::EnvCurrent,
        "hatch:env:use" => match rest.first() {
            Some(name) => Command::EnvUse(name.to_string()),
            None => Command::Chat(trimmed.to_string()),
        },
        "hatch:pkg:add" => match rest.len() {
            1 => Command::PkgAdd(PkgAddArgs::Local(PathBuf::from(rest[0]))),
            2 => Command::PkgAdd(PkgAddArgs::Registry { name: rest[0].to_string(), version: rest[1].to_string() }),
            _ => Command::Chat(trimmed.to_string()),
        },
        "hatch:pkg:remove" => match rest.first() {
            Some(name) => Command::PkgRemove(name.to_string()),
            None => Command::Chat(trimmed.to_string()),
        },
        "hatch:pkg:list" => Command::PkgList,
        "hatch:create" => match rest.first() {
            Some(name) => Command::HatchCreate(name.to_string()),
            None => Command::Chat(trimmed.to_string()),
        },
        "hatch:validate" => match rest.first() {
            Some(path) => Command::HatchValidate(PathBuf::from(path)),
            None => Command::Chat(trimmed.to_string()),
        },
        _ => Command::Chat(trimmed.to_string()),
    }
}

/// Scaffolds a minimal package directory at `dir` named `name`: a
/// `hatch_metadata.json` with empty dependency lists and a matching
/// `<name>.py` entry-point stub, the shape [`hatch_core::loader`] and
/// [`hatch_core::env_manager`] expect to find under a package's directory.
pub fn scaffold_package(dir: &std::path::Path, name: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let metadata = PackageMetadata {
        name: name.to_string(),
        version: "0.1.0".to_string(),
        description: String::new(),
        category: String::new(),
        tags: Vec::new(),
        dependencies: Vec::new(),
        python_dependencies: Vec::new(),
        compatibility: std::collections::HashMap::new(),
    };
    let metadata_json = serde_json::to_string_pretty(&metadata)?;
    std::fs::write(dir.join("hatch_metadata.json"), metadata_json)?;

    let stub = format!(
        "\"\"\"Entry point for the {name} Hatch package.\"\"\"\n\n\ndef main():\n    pass\n\n\nif __name__ == \"__main__\":\n    main()\n"
    );
    std::fs::write(dir.join(format!("{name}.py")), stub)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognises_bare_commands() {
        assert_eq!(parse("help"), Command::Help);
        assert_eq!(parse("  exit  "), Command::Exit);
        assert_eq!(parse("quit"), Command::Exit);
        assert_eq!(parse("clear"), Command::Clear);
        assert_eq!(parse("enable_tools"), Command::EnableTools);
        assert_eq!(parse("disable_tools"), Command::DisableTools);
    }

    #[test]
    fn parse_show_logs_defaults_to_none_without_argument() {
        assert_eq!(parse("show_logs"), Command::ShowLogs(None));
        assert_eq!(parse("show_logs 50"), Command::ShowLogs(Some(50)));
        assert_eq!(parse("show_logs nope"), Command::ShowLogs(None));
    }

    #[test]
    fn parse_set_commands_require_their_argument() {
        assert_eq!(parse("set_log_level debug"), Command::SetLogLevel("debug".to_string()));
        assert_eq!(parse("set_log_level"), Command::Chat("set_log_level".to_string()));
        assert_eq!(parse("set_max_tool_call_iterations 3"), Command::SetMaxToolCallIterations(3));
        assert_eq!(parse("set_max_working_time 60"), Command::SetMaxWorkingTime(60));
    }

    #[test]
    fn parse_hatch_env_namespace() {
        assert_eq!(parse("hatch:env:list"), Command::EnvList);
        assert_eq!(parse("hatch:env:create scratch"), Command::EnvCreate("scratch".to_string()));
        assert_eq!(parse("hatch:env:remove scratch"), Command::EnvRemove("scratch".to_string()));
        assert_eq!(parse("hatch:env:current"), Command::EnvCurrent);
        assert_eq!(parse("hatch:env:use scratch"), Command::EnvUse("scratch".to_string()));
    }

    #[test]
    fn parse_hatch_pkg_add_distinguishes_local_from_registry() {
        assert_eq!(
            parse("hatch:pkg:add ./widget"),
            Command::PkgAdd(PkgAddArgs::Local(PathBuf::from("./widget")))
        );
        assert_eq!(
            parse("hatch:pkg:add widget 1.0.0"),
            Command::PkgAdd(PkgAddArgs::Registry { name: "widget".to_string(), version: "1.0.0".to_string() })
        );
    }

    #[test]
    fn parse_falls_back_to_chat_for_unknown_input() {
        assert_eq!(parse("what's the weather"), Command::Chat("what's the weather".to_string()));
    }

    #[test]
    fn scaffold_package_writes_metadata_and_stub() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("widget");
        scaffold_package(&pkg_dir, "widget").unwrap();
        assert!(pkg_dir.join("hatch_metadata.json").exists());
        assert!(pkg_dir.join("widget.py").exists());
    }
}
