//! Test doubles for the process and viewer collaborators.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{PtyError, ViewerError};
use crate::pty::{KillSignal, PtyConfig, PtyHandle, PtyMessage, PtySpawner, PtyState, SpawnedPty};
use crate::viewer::{Viewer, ViewerMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FakeCall {
    Write(Vec<u8>),
    Resize(u16, u16),
    Kill(KillSignal),
}

struct FakeProcess {
    config: PtyConfig,
    output: Option<mpsc::UnboundedSender<Vec<u8>>>,
    calls: Arc<Mutex<Vec<FakeCall>>>,
    fail_writes: Arc<AtomicBool>,
}

/// Spawner whose processes record their input and whose output is driven by
/// the test. Processes are addressed by spawn order.
pub(crate) struct FakeSpawner {
    fail: bool,
    resizable: bool,
    hold: AtomicBool,
    held: AtomicUsize,
    processes: Mutex<Vec<FakeProcess>>,
}

impl FakeSpawner {
    fn build(fail: bool, resizable: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            resizable,
            hold: AtomicBool::new(false),
            held: AtomicUsize::new(0),
            processes: Mutex::new(Vec::new()),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false, true)
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true, true)
    }

    pub fn without_resize() -> Arc<Self> {
        Self::build(false, false)
    }

    pub fn spawn_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn config(&self, index: usize) -> PtyConfig {
        self.processes.lock().unwrap()[index].config.clone()
    }

    pub fn calls(&self, index: usize) -> Vec<FakeCall> {
        self.processes.lock().unwrap()[index]
            .calls
            .lock()
            .unwrap()
            .clone()
    }

    /// Make the process produce output.
    pub fn emit(&self, index: usize, data: &[u8]) {
        let processes = self.processes.lock().unwrap();
        if let Some(tx) = &processes[index].output {
            let _ = tx.send(data.to_vec());
        }
    }

    /// End the process's output stream, as if it exited.
    pub fn exit(&self, index: usize) {
        self.processes.lock().unwrap()[index].output.take();
    }

    /// While set, `spawn` blocks its calling thread, like a slow fork/exec.
    pub fn hold_spawns(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Number of `spawn` calls currently blocked by `hold_spawns`.
    pub fn held_spawns(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, index: usize) {
        self.processes.lock().unwrap()[index]
            .fail_writes
            .store(true, Ordering::SeqCst);
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(&self, config: PtyConfig) -> Result<SpawnedPty, PtyError> {
        if self.fail {
            return Err(PtyError::CreateFailed("fake spawn failure".into()));
        }

        if self.hold.load(Ordering::SeqCst) {
            self.held.fetch_add(1, Ordering::SeqCst);
            while self.hold.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.held.fetch_sub(1, Ordering::SeqCst);
        }

        let (msg_tx, mut msg_rx) = mpsc::channel(32);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fail_writes = Arc::new(AtomicBool::new(false));
        let resizable = self.resizable;

        let mut processes = self.processes.lock().unwrap();
        let pid = 1000 + processes.len() as u32;
        let command = config.command.clone();
        let (cols, rows) = (config.cols, config.rows);

        let actor_calls = calls.clone();
        let actor_fail_writes = fail_writes.clone();
        tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                match msg {
                    PtyMessage::Write { data, respond_to } => {
                        let result = if actor_fail_writes.load(Ordering::SeqCst) {
                            Err(PtyError::WriteFailed("fake write failure".into()))
                        } else {
                            let n = data.len();
                            actor_calls.lock().unwrap().push(FakeCall::Write(data));
                            Ok(n)
                        };
                        let _ = respond_to.send(result);
                    }
                    PtyMessage::Resize {
                        cols,
                        rows,
                        respond_to,
                    } => {
                        let result = if resizable {
                            actor_calls.lock().unwrap().push(FakeCall::Resize(cols, rows));
                            Ok(())
                        } else {
                            Err(PtyError::ResizeUnsupported)
                        };
                        let _ = respond_to.send(result);
                    }
                    PtyMessage::GetState { respond_to } => {
                        let _ = respond_to.send(PtyState {
                            running: true,
                            pid: Some(pid),
                            command: command.clone(),
                            cols,
                            rows,
                        });
                    }
                    PtyMessage::Kill { signal, respond_to } => {
                        actor_calls.lock().unwrap().push(FakeCall::Kill(signal));
                        let _ = respond_to.send(Ok(()));
                    }
                }
            }
        });

        processes.push(FakeProcess {
            config,
            output: Some(output_tx),
            calls,
            fail_writes,
        });

        Ok(SpawnedPty {
            handle: PtyHandle::new(msg_tx),
            pid: Some(pid),
            output: output_rx,
        })
    }
}

enum Behaviour {
    Record,
    Fail,
    Panic,
}

/// Viewer that keeps everything it is sent.
pub(crate) struct RecordingViewer {
    behaviour: Behaviour,
    messages: Mutex<Vec<ViewerMessage>>,
    attempts: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingViewer {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            messages: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn new() -> Self {
        Self::with(Behaviour::Record)
    }

    /// Every send fails with a transport error.
    pub fn failing() -> Self {
        Self::with(Behaviour::Fail)
    }

    /// Every send panics.
    pub fn panicking() -> Self {
        Self::with(Behaviour::Panic)
    }

    pub fn messages(&self) -> Vec<ViewerMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Viewer for RecordingViewer {
    fn send(&self, message: &ViewerMessage) -> Result<(), ViewerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Record => {
                self.messages.lock().unwrap().push(message.clone());
                Ok(())
            }
            Behaviour::Fail => Err(ViewerError::Transport("connection reset".into())),
            Behaviour::Panic => panic!("viewer exploded"),
        }
    }

    fn close(&self) -> Result<(), ViewerError> {
        self.closed.store(true, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Record => Ok(()),
            _ => Err(ViewerError::Closed),
        }
    }
}

/// Next message from a viewer channel, failing the test after two seconds.
pub(crate) async fn recv(rx: &mut mpsc::UnboundedReceiver<ViewerMessage>) -> ViewerMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for viewer message")
        .expect("viewer channel closed")
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within two seconds");
}
