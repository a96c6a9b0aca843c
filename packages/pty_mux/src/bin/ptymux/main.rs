use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use pty_mux::{
    AttachOptions, ChannelViewer, CreateOptions, MuxConfig, SessionManager, ViewerMessage,
    ViewerRef,
};

mod terminal;

#[derive(Parser)]
#[command(name = "ptymux")]
#[command(about = "Run a shell in an in-process PTY session and attach to it")]
struct Args {
    /// TOML config file (PTYMUX_* env vars override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shell to run instead of $SHELL
    #[arg(short, long)]
    shell: Option<String>,

    /// Working directory for the shell
    #[arg(long)]
    cwd: Option<String>,

    /// Session id
    #[arg(long, default_value = "main")]
    id: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "pty_mux=debug,ptymux=debug"
    } else {
        "pty_mux=info,ptymux=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = MuxConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let manager = Arc::new(SessionManager::new(config));

    let (cols, rows) = terminal::terminal_size().unwrap_or((80, 24));
    let session = manager
        .create(
            &args.id,
            CreateOptions {
                shell: args.shell.clone(),
                cwd: args.cwd.clone(),
                cols: Some(cols),
                rows: Some(rows),
            },
        )
        .await
        .context("Failed to create session")?;
    info!("Session {} running {} in {}", session.id, session.shell, session.cwd);

    // Attach like a rendering client would: defer history until geometry is known
    let (viewer, mut output) = ChannelViewer::new();
    let viewer = ViewerRef::new(viewer);
    manager
        .attach(&args.id, viewer.clone(), AttachOptions { defer_replay: true })
        .await?;

    #[cfg(unix)]
    let _raw_mode = terminal::RawModeGuard::enter();

    manager.resize(&args.id, cols, rows).await?;
    let mut window_changes =
        terminal::WindowChanges::new().context("Failed to watch terminal size")?;

    // Blocking stdin reads stay off the runtime; the thread dies with the process
    let input_manager = manager.clone();
    let input_id = args.id.clone();
    let runtime = tokio::runtime::Handle::current();
    std::thread::spawn(move || {
        use std::io::Read;

        let mut stdin = std::io::stdin();
        let mut buffer = [0u8; 1024];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let data = buffer[..n].to_vec();
                    if runtime
                        .block_on(input_manager.write(&input_id, data))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            message = output.recv() => match message {
                Some(ViewerMessage::Output { data }) => {
                    stdout.write_all(data.as_bytes())?;
                    stdout.flush()?;
                }
                Some(ViewerMessage::Exit { code }) => {
                    info!("Session {} exited (code {})", args.id, code);
                    break;
                }
                None => break,
            },
            Some(()) = window_changes.recv() => {
                if let Some((cols, rows)) = terminal::terminal_size() {
                    if let Err(e) = manager.resize(&args.id, cols, rows).await {
                        warn!("Failed to resize session {}: {}", args.id, e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    manager.detach(&args.id, &viewer).await;
    manager.kill_all().await;
    Ok(())
}
