//! Typed application settings (ambient configuration layer).
//!
//! [`hatch_config::load_and_apply`] should be called once at process start so
//! `.env`/XDG values land in `std::env` before [`Settings::from_env`] reads it;
//! existing environment variables always win.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Which LLM provider's payload shape and auth to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown llm_provider: {other} (use ollama or openai)")),
        }
    }
}

/// Application settings: one value built at startup, passed by reference to
/// every component that needs it. Never re-read from the process environment
/// at point of use (§10 A1).
#[derive(Clone, Debug)]
pub struct Settings {
    pub ollama_api_url: String,
    pub openai_api_url: String,
    pub ollama_model: String,
    pub openai_model: String,
    pub openai_api_key: Option<String>,
    pub llm_provider: LlmProvider,
    pub hatch_envs_dir: PathBuf,
    pub hatch_registry_path: PathBuf,
    pub hatch_cache_dir: PathBuf,
    /// Per-turn tool-dispatch cap. An `Arc<AtomicU32>` rather than a plain
    /// `u32` so `set_max_tool_call_iterations` can change it for every
    /// subsequent turn without rebuilding the Chat Session (and losing its
    /// history) or re-reading the process environment.
    pub max_tool_call_iteration: Arc<AtomicU32>,
    /// Per-turn wall-clock cap in seconds; same rationale as
    /// `max_tool_call_iteration`.
    pub max_working_time_secs: Arc<AtomicU64>,
    pub log_level: String,
    pub log_dir: PathBuf,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Default per-turn tool-dispatch cap.
    pub const DEFAULT_MAX_TOOL_CALL_ITERATION: u32 = 5;
    /// Default per-turn wall-clock cap in seconds.
    pub const DEFAULT_MAX_WORKING_TIME_SECS: u64 = 30;

    /// Builds settings from the current process environment. Call
    /// `hatch_config::load_and_apply` first so `.env`/XDG values are visible here.
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let llm_provider = std::env::var("LLM_PROVIDER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(LlmProvider::Ollama);

        Self {
            ollama_api_url: env_string("OLLAMA_API_URL", "http://localhost:11434/api"),
            openai_api_url: env_string("OPENAI_API_URL", "https://api.openai.com/v1"),
            ollama_model: env_string("OLLAMA_MODEL", "llama3"),
            openai_model: env_string("OPENAI_MODEL", "gpt-4o-mini"),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            llm_provider,
            hatch_envs_dir: PathBuf::from(env_string(
                "HATCH_ENVS_DIR",
                &format!("{home}/.hatch/envs"),
            )),
            hatch_registry_path: PathBuf::from(env_string(
                "HATCH_REGISTRY_PATH",
                &format!("{home}/.hatch/registry.json"),
            )),
            hatch_cache_dir: PathBuf::from(env_string(
                "HATCH_CACHE_DIR",
                &format!("{home}/.hatch/cache/packages"),
            )),
            max_tool_call_iteration: Arc::new(AtomicU32::new(env_parsed(
                "MAX_TOOL_CALL_ITERATION",
                Self::DEFAULT_MAX_TOOL_CALL_ITERATION,
            ))),
            max_working_time_secs: Arc::new(AtomicU64::new(env_parsed(
                "MAX_WORKING_TIME",
                Self::DEFAULT_MAX_WORKING_TIME_SECS,
            ))),
            log_level: env_string("LOG_LEVEL", "info"),
            log_dir: PathBuf::from(env_string("LOG_DIR", &format!("{home}/.hatch/logs"))),
        }
    }

    pub fn max_tool_call_iteration(&self) -> u32 {
        self.max_tool_call_iteration.load(Ordering::Relaxed)
    }

    pub fn set_max_tool_call_iteration(&self, value: u32) {
        self.max_tool_call_iteration.store(value, Ordering::Relaxed);
    }

    pub fn max_working_time_secs(&self) -> u64 {
        self.max_working_time_secs.load(Ordering::Relaxed)
    }

    pub fn set_max_working_time_secs(&self, value: u64) {
        self.max_working_time_secs.store(value, Ordering::Relaxed);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_provider_from_str_parses_known_values() {
        assert_eq!("ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Ollama);
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
    }

    #[test]
    fn llm_provider_from_str_rejects_unknown() {
        assert!("groq".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn from_env_applies_defaults_when_unset() {
        std::env::remove_var("MAX_TOOL_CALL_ITERATION");
        std::env::remove_var("MAX_WORKING_TIME");
        let settings = Settings::from_env();
        assert_eq!(
            settings.max_tool_call_iteration(),
            Settings::DEFAULT_MAX_TOOL_CALL_ITERATION
        );
        assert_eq!(
            settings.max_working_time_secs(),
            Settings::DEFAULT_MAX_WORKING_TIME_SECS
        );
    }

    #[test]
    fn from_env_reads_overrides() {
        std::env::set_var("MAX_TOOL_CALL_ITERATION", "9");
        let settings = Settings::from_env();
        assert_eq!(settings.max_tool_call_iteration(), 9);
        std::env::remove_var("MAX_TOOL_CALL_ITERATION");
    }

    #[test]
    fn set_max_tool_call_iteration_takes_effect_immediately() {
        let settings = Settings::from_env();
        settings.set_max_tool_call_iteration(2);
        assert_eq!(settings.max_tool_call_iteration(), 2);
    }

    #[test]
    fn set_max_working_time_secs_takes_effect_immediately() {
        let settings = Settings::from_env();
        settings.set_max_working_time_secs(7);
        assert_eq!(settings.max_working_time_secs(), 7);
    }
}
