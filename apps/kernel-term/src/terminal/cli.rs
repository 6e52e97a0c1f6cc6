use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use kernel_term_core::config::ClientConfig;
use kernel_term_core::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "kernel-term",
    about = "Interactive terminal client for kernel shell sessions",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "KERNEL_TERM_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "KERNEL_TERM_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

/// Overrides for the session environment; unset flags keep the values from
/// `KERNEL_TERM_*` variables.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    #[arg(long, global = true, value_name = "PROGRAM", help = "Shell the session runs")]
    pub shell: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "PROMPT",
        help = "Prompt the server should expect; detected when omitted"
    )]
    pub prompt: Option<String>,

    /// Unset leaves `KERNEL_TERM_RAW_OUTPUT` in charge.
    #[arg(
        long = "raw-output",
        global = true,
        action = ArgAction::SetTrue,
        help = "Ask the server not to strip ANSI sequences"
    )]
    pub raw_output: bool,
}

impl SessionArgs {
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(shell) = self.shell.as_ref().filter(|shell| !shell.trim().is_empty()) {
            config.shell = shell.clone();
        }
        if let Some(prompt) = self.prompt.as_ref() {
            config.prompt = Some(prompt.clone()).filter(|prompt| !prompt.is_empty());
        }
        if self.raw_output {
            config.raw_output = true;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open an interactive session (default)
    Shell,
    /// Run one command on a fresh session and exit with its code
    Exec(ExecArgs),
    /// Create sessions and print the server's listing
    Sessions(SessionsArgs),
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[arg(long, default_value_t = 1, help = "Number of sessions to create before listing")]
    pub count: usize,

    #[arg(long, help = "Print the listing as JSON")]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_collects_trailing_words() {
        let cli = Cli::try_parse_from(["kernel-term", "exec", "ls", "-la"]).unwrap();
        match cli.command {
            Some(Command::Exec(args)) => assert_eq!(args.command, vec!["ls", "-la"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn session_flags_override_config() {
        let cli = Cli::try_parse_from([
            "kernel-term",
            "--shell",
            "/bin/zsh",
            "--raw-output",
            "sessions",
            "--count",
            "2",
        ])
        .unwrap();
        let mut config = ClientConfig::default();
        cli.session.apply(&mut config);
        assert_eq!(config.shell, "/bin/zsh");
        assert!(config.raw_output);
        assert!(matches!(cli.command, Some(Command::Sessions(SessionsArgs { count: 2, .. }))));
    }

    #[test]
    fn raw_output_flag_after_subcommand_keeps_following_args() {
        let cli = Cli::try_parse_from(["kernel-term", "sessions", "--raw-output", "--json"]).unwrap();
        assert!(cli.session.raw_output);
        assert!(matches!(cli.command, Some(Command::Sessions(SessionsArgs { json: true, .. }))));

        let mut config = ClientConfig {
            raw_output: true,
            ..ClientConfig::default()
        };
        Cli::try_parse_from(["kernel-term", "shell"])
            .unwrap()
            .session
            .apply(&mut config);
        assert!(config.raw_output);
    }
}
