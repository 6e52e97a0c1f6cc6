use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEvent};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kernel_term_core::config::ClientConfig;
use kernel_term_core::loopback::LoopbackKernel;
use kernel_term_core::service::{KernelService, Session};
use kernel_term_core::sink::{RenderTarget, StdoutSink};
use kernel_term_core::KernelClient;

use crate::terminal::cli::{self, Command, ExecArgs, SessionsArgs};
use crate::terminal::error::CliError;
use crate::terminal::keys::{self, KeyAction};

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KEY_QUEUE: usize = 64;

/// Runs the selected subcommand and returns the process exit code.
pub async fn run(cli: cli::Cli) -> Result<i32, CliError> {
    let mut config = ClientConfig::from_env();
    cli.session.apply(&mut config);
    debug!(target: "kernel_term::app", ?config, "client configuration resolved");

    let service: Arc<dyn KernelService> = Arc::new(LoopbackKernel::new());
    match cli.command.unwrap_or(Command::Shell) {
        Command::Shell => shell(service, &config).await.map(|_| 0),
        Command::Exec(args) => exec(service, &config, args).await,
        Command::Sessions(args) => sessions(service, &config, args).await.map(|_| 0),
    }
}

fn stdout_client(service: Arc<dyn KernelService>, config: &ClientConfig) -> KernelClient {
    let target = RenderTarget::new(StdoutSink::new()).with_backlog_limit(config.backlog_bytes);
    KernelClient::new(service, target)
}

async fn open_session(client: &mut KernelClient, config: &ClientConfig) -> Result<Session, CliError> {
    let session = client.create_session(&config.session_config()).await?;
    client.activate(&session.id).await?;
    info!(target: "kernel_term::app", session_id = %session.id, "session ready");
    Ok(session)
}

async fn close_session(client: &mut KernelClient, session: &Session) {
    if let Err(err) = client.delete_session(&session.id).await {
        warn!(target: "kernel_term::app", session_id = %session.id, error = %err, "failed to delete session");
    }
    client.shutdown().await;
}

async fn shell(service: Arc<dyn KernelService>, config: &ClientConfig) -> Result<(), CliError> {
    let mut client = stdout_client(service, config);
    let session = open_session(&mut client, config).await?;

    let raw = RawModeGuard::new();
    client.render_prompt();

    let (tx, mut rx) = mpsc::channel(KEY_QUEUE);
    let reader = tokio::task::spawn_blocking(move || read_keys(tx));

    while let Some(event) = rx.recv().await {
        match keys::translate(event) {
            KeyAction::Quit => break,
            KeyAction::Skip => {}
            KeyAction::Input(ch) => {
                if let Err(err) = client.handle_key(ch).await {
                    warn!(target: "kernel_term::app", error = %err, "keystroke not delivered");
                    client.target().write_line(format!("[{err}]").as_bytes());
                }
            }
        }
    }
    // Closing the queue stops the reader at its next poll.
    drop(rx);

    close_session(&mut client, &session).await;
    drop(raw);

    match reader.await {
        Ok(result) => result.map_err(CliError::from),
        Err(err) => Err(CliError::Runtime(err.to_string())),
    }
}

fn read_keys(tx: mpsc::Sender<KeyEvent>) -> io::Result<()> {
    while !tx.is_closed() {
        if !event::poll(KEY_POLL_INTERVAL)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if tx.blocking_send(key).is_err() {
                break;
            }
        }
    }
    Ok(())
}

async fn exec(
    service: Arc<dyn KernelService>,
    config: &ClientConfig,
    args: ExecArgs,
) -> Result<i32, CliError> {
    let command = args.command.join(" ");
    if command.trim().is_empty() {
        return Err(CliError::InvalidArgument("command must not be empty".into()));
    }

    let mut client = stdout_client(service, config);
    let session = open_session(&mut client, config).await?;

    let result = match client.execute(&command).await {
        Ok(run) => run.finish().await,
        Err(err) => Err(err),
    };
    close_session(&mut client, &session).await;

    match result? {
        Some(code) => Ok(code),
        None => {
            warn!(target: "kernel_term::app", session_id = %session.id, "execution ended without an exit code");
            Ok(1)
        }
    }
}

async fn sessions(
    service: Arc<dyn KernelService>,
    config: &ClientConfig,
    args: SessionsArgs,
) -> Result<(), CliError> {
    let mut client = stdout_client(service, config);
    for _ in 0..args.count {
        client.create_session(&config.session_config()).await?;
    }

    let listing = client.list_sessions().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for session in &listing {
            println!(
                "{}\t{}",
                session.id,
                session.prompt_pattern.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

struct RawModeGuard(bool);

impl RawModeGuard {
    fn new() -> Self {
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(err) => {
                warn!(target: "kernel_term::app", error = %err, "failed to enable raw mode");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}
