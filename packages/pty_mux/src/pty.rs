use anyhow::Context;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::PtyError;

/// Configuration for spawning a PTY
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: "/bin/sh".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// State of a PTY process
#[derive(Clone, Debug)]
pub struct PtyState {
    pub running: bool,
    pub pid: Option<u32>,
    pub command: String,
    pub cols: u16,
    pub rows: u16,
}

/// Signal used to terminate the process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillSignal {
    Hangup,
    Terminate,
    /// Immediate; the child is reaped afterwards
    Kill,
}

/// Messages that can be sent to the PTY actor
pub(crate) enum PtyMessage {
    Write {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, PtyError>>,
    },
    Resize {
        cols: u16,
        rows: u16,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    GetState {
        respond_to: oneshot::Sender<PtyState>,
    },
    Kill {
        signal: KillSignal,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
}

/// Handle to communicate with a PTY actor
#[derive(Clone)]
pub struct PtyHandle {
    sender: mpsc::Sender<PtyMessage>,
}

impl PtyHandle {
    pub(crate) fn new(sender: mpsc::Sender<PtyMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PtyMessage,
        what: &str,
    ) -> Result<T, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| PtyError::ChannelError(format!("Failed to send {what} message")))?;
        rx.await
            .map_err(|_| PtyError::ChannelError(format!("Failed to receive {what} response")))
    }

    /// Write raw input to the process
    pub async fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        let data = data.to_vec();
        self.request(|respond_to| PtyMessage::Write { data, respond_to }, "write")
            .await?
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.request(
            |respond_to| PtyMessage::Resize {
                cols,
                rows,
                respond_to,
            },
            "resize",
        )
        .await?
    }

    pub async fn state(&self) -> Result<PtyState, PtyError> {
        self.request(|respond_to| PtyMessage::GetState { respond_to }, "state")
            .await
    }

    pub async fn kill(&self, signal: KillSignal) -> Result<(), PtyError> {
        self.request(|respond_to| PtyMessage::Kill { signal, respond_to }, "kill")
            .await?
    }
}

/// A freshly spawned process: its control handle and its output stream.
///
/// The output channel closes when the process exits.
pub struct SpawnedPty {
    pub handle: PtyHandle,
    pub pid: Option<u32>,
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Creates session processes. The registry only talks to processes through
/// this seam.
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, config: PtyConfig) -> Result<SpawnedPty, PtyError>;
}

/// Spawns real pseudoterminals via `portable-pty`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeSpawner;

impl PtySpawner for NativeSpawner {
    fn spawn(&self, config: PtyConfig) -> Result<SpawnedPty, PtyError> {
        PtyActor::spawn(config)
    }
}

/// The PTY actor that owns a single process
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    state: PtyState,
    receiver: mpsc::Receiver<PtyMessage>,
}

impl PtyActor {
    /// Open a PTY, spawn the command in it and start the actor task and reader thread.
    pub fn spawn(config: PtyConfig) -> Result<SpawnedPty, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }

        if let Some(dir) = &config.working_dir {
            debug!("Setting working directory: {}", dir);
            cmd.cwd(dir);
        }

        cmd.env("TERM", &config.term);
        cmd.env("COLORTERM", "truecolor");

        // Inherit PATH and other essential environment variables
        for key in ["PATH", "HOME", "USER", "LANG"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        info!(
            "Spawning PTY command: {} with args: {:?}",
            config.command, config.args
        );

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", config.command, e);
            PtyError::CreateFailed(e.to_string())
        })?;
        // The child holds its own copy of the slave side
        drop(pair.slave);

        let pid = child.process_id();
        info!("PTY process started with PID: {:?}", pid);

        let mut reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;

        let state = PtyState {
            running: true,
            pid,
            command: config.command,
            cols: config.cols,
            rows: config.rows,
        };

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::channel(32);

        let actor = Self {
            master: pair.master,
            writer: None,
            child,
            state,
            receiver: msg_rx,
        };

        // Blocking reads live on their own thread; dropping output_tx on EOF
        // closes the stream for the consumer.
        std::thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        info!("PTY EOF detected - process has exited");
                        break;
                    }
                    Ok(n) => {
                        if output_tx.send(buffer[..n].to_vec()).is_err() {
                            debug!("PTY output receiver dropped");
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is how Linux reports a hung-up PTY
                        debug!("Error reading PTY output: {}", e);
                        break;
                    }
                }
            }
            debug!("PTY reader thread exiting");
        });

        tokio::spawn(actor.run());

        Ok(SpawnedPty {
            handle: PtyHandle::new(msg_tx),
            pid,
            output: output_rx,
        })
    }

    async fn run(mut self) {
        debug!(
            "PTY actor started for command: {} with PID: {:?}",
            self.state.command, self.state.pid
        );

        // Take the writer immediately to keep the PTY stdin open
        match self.master.take_writer() {
            Ok(writer) => self.writer = Some(writer),
            Err(e) => error!("Failed to get PTY writer: {}", e),
        }

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PtyMessage::Write { data, respond_to } => {
                    let _ = respond_to.send(self.handle_write(&data));
                }
                PtyMessage::Resize {
                    cols,
                    rows,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.handle_resize(cols, rows));
                }
                PtyMessage::GetState { respond_to } => {
                    let _ = respond_to.send(self.state.clone());
                }
                PtyMessage::Kill { signal, respond_to } => {
                    let result = self.handle_kill(signal);
                    let killed = result.is_ok() && signal == KillSignal::Kill;
                    let _ = respond_to.send(result);
                    if killed {
                        break;
                    }
                }
            }

            if let Ok(Some(status)) = self.child.try_wait() {
                info!("PTY process exited with status: {:?}", status);
                self.state.running = false;
                break;
            }
        }

        self.shutdown();
    }

    /// Make sure the child is gone and reap it off the async runtime.
    fn shutdown(mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = ?self.state.pid, "PTY handles dropped with process still running, killing it");
            if let Err(e) = self.child.kill() {
                warn!("Failed to kill orphaned PTY process: {}", e);
            }
        }
        let mut child = self.child;
        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
        });
        debug!("PTY actor shutting down");
    }

    fn handle_write(&mut self, data: &[u8]) -> Result<usize, PtyError> {
        if self.writer.is_none() {
            self.writer = Some(
                self.master
                    .take_writer()
                    .map_err(|e| PtyError::WriteFailed(e.to_string()))?,
            );
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PtyError::WriteFailed("No PTY writer available".into()))?;

        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;

        Ok(data.len())
    }

    fn handle_resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        self.state.cols = cols;
        self.state.rows = rows;
        Ok(())
    }

    fn handle_kill(&mut self, signal: KillSignal) -> Result<(), PtyError> {
        match signal {
            KillSignal::Hangup | KillSignal::Terminate => {
                #[cfg(unix)]
                {
                    use nix::sys::signal::{Signal, kill};
                    use nix::unistd::Pid;

                    let sig = match signal {
                        KillSignal::Hangup => Signal::SIGHUP,
                        _ => Signal::SIGTERM,
                    };
                    if let Some(pid) = self.state.pid {
                        kill(Pid::from_raw(pid as i32), sig)
                            .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                    }
                }
                #[cfg(not(unix))]
                {
                    self.child
                        .kill()
                        .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                }
            }
            KillSignal::Kill => {
                self.child
                    .kill()
                    .map_err(|e| PtyError::KillFailed(e.to_string()))?;
            }
        }

        self.state.running = false;
        Ok(())
    }
}
