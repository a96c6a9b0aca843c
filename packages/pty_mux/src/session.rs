use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::pty::PtyHandle;
use crate::scrollback::ScrollbackBuffer;
use crate::error::ViewerError;
use crate::viewer::{Viewer, ViewerMessage, ViewerRef};

/// Options for creating a session. Unset fields fall back to the registry's
/// configured defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateOptions {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOptions {
    /// Hold back the scrollback replay until the session's first resize
    #[serde(default)]
    pub defer_replay: bool,
}

/// Read-only projection of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub shell: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub connected_clients: usize,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub scrollback_lines: usize,
}

/// Create options after defaults and shell resolution are applied.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedOptions {
    pub shell: String,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
}

/// One live shell process with its scrollback and attached viewers.
pub(crate) struct Session {
    pub id: String,
    pub pty: PtyHandle,
    pub pid: Option<u32>,
    pub shell: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<SessionState>,
    pub pump: OnceLock<AbortHandle>,
}

/// Everything the pump and the registry both mutate. Guarded by one lock so
/// replay and live broadcast of a session never interleave.
pub(crate) struct SessionState {
    pub buffer: ScrollbackBuffer,
    pub viewers: HashSet<ViewerRef>,
    pub pending_replay: HashSet<ViewerRef>,
    pub has_received_resize: bool,
    pub last_activity: DateTime<Utc>,
    pub cols: u16,
    pub rows: u16,
}

impl Session {
    pub fn new(
        id: String,
        pty: PtyHandle,
        pid: Option<u32>,
        options: ResolvedOptions,
        max_lines: usize,
    ) -> Self {
        let now = Utc::now();
        let ResolvedOptions {
            shell,
            cwd,
            cols,
            rows,
        } = options;
        Self {
            id,
            pty,
            pid,
            shell,
            cwd,
            created_at: now,
            state: Mutex::new(SessionState {
                buffer: ScrollbackBuffer::new(max_lines),
                viewers: HashSet::new(),
                pending_replay: HashSet::new(),
                has_received_resize: false,
                last_activity: now,
                cols,
                rows,
            }),
            pump: OnceLock::new(),
        }
    }

    pub fn info(&self, state: &SessionState) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            shell: self.shell.clone(),
            cwd: self.cwd.clone(),
            created_at: self.created_at,
            last_activity: state.last_activity,
            connected_clients: state.viewers.len(),
            pid: self.pid,
            cols: state.cols,
            rows: state.rows,
            scrollback_lines: state.buffer.line_count(),
        }
    }

    pub fn stop_pump(&self) {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
    }
}

impl SessionState {
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Send to every attached viewer; a failing viewer never stops delivery
    /// to the others.
    pub fn broadcast(&self, session_id: &str, message: &ViewerMessage) {
        for viewer in &self.viewers {
            if let Err(e) = call_viewer(viewer, |v| v.send(message)) {
                debug!(session = %session_id, ?viewer, "dropping message for viewer: {}", e);
            }
        }
    }

    /// Push the whole scrollback to one viewer, if there is any.
    pub fn replay_to(&self, session_id: &str, viewer: &ViewerRef) {
        if self.buffer.is_empty() {
            return;
        }
        let contents = self.buffer.contents();
        debug!(session = %session_id, bytes = contents.len(), "replaying scrollback");
        let message = ViewerMessage::output(contents);
        if let Err(e) = call_viewer(viewer, |v| v.send(&message)) {
            warn!(session = %session_id, ?viewer, "scrollback replay failed: {}", e);
        }
    }

    /// Exit notice, close every viewer and drop all buffered output.
    pub fn teardown(&mut self, session_id: &str) {
        self.broadcast(session_id, &ViewerMessage::exit());
        for viewer in self.viewers.drain() {
            if let Err(e) = call_viewer(&viewer, |v| v.close()) {
                debug!(session = %session_id, ?viewer, "viewer close failed: {}", e);
            }
        }
        self.pending_replay.clear();
        self.buffer.clear();
    }
}

/// Run one viewer call. A panicking viewer counts as a failed one.
fn call_viewer(
    viewer: &ViewerRef,
    call: impl FnOnce(&dyn Viewer) -> Result<(), ViewerError>,
) -> Result<(), ViewerError> {
    catch_unwind(AssertUnwindSafe(|| call(&**viewer)))
        .unwrap_or_else(|_| Err(ViewerError::Transport("viewer panicked".into())))
}
