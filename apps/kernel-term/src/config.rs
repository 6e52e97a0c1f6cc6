use std::env;

use crate::service::SessionConfig;
use crate::sink::DEFAULT_BACKLOG_LIMIT;

pub const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub shell: String,
    pub prompt: Option<String>,
    pub raw_output: bool,
    pub backlog_bytes: usize,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let shell = lookup("KERNEL_TERM_SHELL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.shell);
        let prompt = lookup("KERNEL_TERM_PROMPT").filter(|value| !value.is_empty());
        let raw_output = lookup("KERNEL_TERM_RAW_OUTPUT")
            .map(|value| truthy(&value))
            .unwrap_or(defaults.raw_output);
        let backlog_bytes = lookup("KERNEL_TERM_BACKLOG_BYTES")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(defaults.backlog_bytes);

        Self {
            shell,
            prompt,
            raw_output,
            backlog_bytes,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.shell.clone())
            .with_prompt(self.prompt.clone())
            .with_raw_output(self.raw_output)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            prompt: None,
            raw_output: false,
            backlog_bytes: DEFAULT_BACKLOG_LIMIT,
        }
    }
}

pub fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
