use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MuxConfig;
use crate::decode::Utf8StreamDecoder;
use crate::error::{MuxError, PtyError};
use crate::pty::{KillSignal, NativeSpawner, PtyConfig, PtySpawner};
use crate::session::{AttachOptions, CreateOptions, ResolvedOptions, Session, SessionInfo};
use crate::shell::ShellResolver;
use crate::viewer::{ViewerMessage, ViewerRef};

type SessionMap = HashMap<String, Arc<Session>>;

/// A spawned, not yet registered session and its process output.
type Spawned = (Arc<Session>, mpsc::UnboundedReceiver<Vec<u8>>);

/// Registry of live sessions.
///
/// Lock order is always registry map first, then a session's state. The
/// output pump of a session only ever takes its own session's state lock,
/// except on exit where it follows the same order.
pub struct SessionManager {
    sessions: Arc<RwLock<SessionMap>>,
    spawner: Arc<dyn PtySpawner>,
    resolver: ShellResolver,
    config: MuxConfig,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(MuxConfig::default())
    }
}

impl SessionManager {
    /// Registry spawning real PTYs.
    pub fn new(config: MuxConfig) -> Self {
        Self::with_spawner(config, Arc::new(NativeSpawner))
    }

    pub fn with_spawner(config: MuxConfig, spawner: Arc<dyn PtySpawner>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            spawner,
            resolver: ShellResolver::from_config(&config.shell),
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: ShellResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Create a new session. Fails if `id` is already live.
    ///
    /// The process is spawned without holding the registry lock; if another
    /// caller registers `id` meanwhile, the fresh process is killed.
    pub async fn create(&self, id: &str, options: CreateOptions) -> Result<SessionInfo, MuxError> {
        validate_id(id)?;
        if self.has(id).await {
            return Err(MuxError::AlreadyExists(id.to_string()));
        }

        let fresh = self.spawn_session(id, options)?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            drop(sessions);
            discard(fresh.0).await;
            return Err(MuxError::AlreadyExists(id.to_string()));
        }
        let session = self.register(&mut sessions, fresh);
        let state = session.state.lock().await;
        Ok(session.info(&state))
    }

    /// Resolve options and spawn the process for a session that is not yet
    /// registered.
    fn spawn_session(&self, id: &str, options: CreateOptions) -> Result<Spawned, MuxError> {
        let defaults = &self.config.session;
        let resolved = ResolvedOptions {
            shell: self.resolver.resolve(options.shell.as_deref())?,
            cwd: options.cwd.unwrap_or_else(|| defaults.resolved_cwd()),
            cols: options.cols.unwrap_or(defaults.cols),
            rows: options.rows.unwrap_or(defaults.rows),
        };

        let spawned = self
            .spawner
            .spawn(PtyConfig {
                command: resolved.shell.clone(),
                args: Vec::new(),
                working_dir: Some(resolved.cwd.clone()),
                env: Vec::new(),
                term: defaults.term.clone(),
                cols: resolved.cols,
                rows: resolved.rows,
            })
            .inspect_err(|e| error!(session = %id, "failed to spawn session process: {}", e))?;

        let session = Arc::new(Session::new(
            id.to_string(),
            spawned.handle,
            spawned.pid,
            resolved,
            self.config.scrollback.max_lines,
        ));
        Ok((session, spawned.output))
    }

    /// Insert a freshly spawned session and start its output pump.
    fn register(&self, sessions: &mut SessionMap, (session, output): Spawned) -> Arc<Session> {
        info!(
            session = %session.id,
            shell = %session.shell,
            cwd = %session.cwd,
            pid = ?session.pid,
            "session created"
        );
        sessions.insert(session.id.clone(), session.clone());

        let pump = tokio::spawn(run_pump(session.clone(), output));
        let _ = session.pump.set(pump.abort_handle());
        tokio::spawn(supervise(self.sessions.clone(), session.clone(), pump));

        session
    }

    /// Forward input to the session's process. Transport failures are logged,
    /// not returned.
    pub async fn write(&self, id: &str, data: impl AsRef<[u8]>) -> Result<(), MuxError> {
        let session = self.lookup(id).await?;

        if let Err(e) = session.pty.write(data.as_ref()).await {
            warn!(session = %id, "failed to write to session process: {}", e);
        }
        session.state.lock().await.touch();
        Ok(())
    }

    /// Change the process geometry. The first resize of a session flushes the
    /// viewers waiting for a deferred replay.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), MuxError> {
        let session = self.lookup(id).await?;

        let resized = match session.pty.resize(cols, rows).await {
            Ok(()) => true,
            Err(PtyError::ResizeUnsupported) => {
                debug!(session = %id, "process does not support resize");
                false
            }
            Err(e) => {
                warn!(session = %id, "failed to resize session process: {}", e);
                false
            }
        };

        let mut state = session.state.lock().await;
        if resized {
            state.cols = cols;
            state.rows = rows;
        }
        state.touch();

        if !state.has_received_resize {
            state.has_received_resize = true;
            let pending: Vec<ViewerRef> = state.pending_replay.drain().collect();
            debug!(session = %id, viewers = pending.len(), "first resize, flushing deferred replays");
            for viewer in &pending {
                state.replay_to(&session.id, viewer);
            }
        }
        Ok(())
    }

    /// Add a viewer to a session, creating the session if `id` is unknown.
    ///
    /// Without `defer_replay` the viewer gets the scrollback right away, before
    /// any further live output. With it, the replay waits for the session's
    /// first resize while live output flows immediately.
    pub async fn attach(
        &self,
        id: &str,
        viewer: ViewerRef,
        options: AttachOptions,
    ) -> Result<SessionInfo, MuxError> {
        validate_id(id)?;

        let mut sessions = self.sessions.write().await;
        let mut spare = None;
        let existing = sessions.get(id).cloned();
        let session = match existing {
            Some(session) => session,
            None => {
                drop(sessions);
                debug!(session = %id, "auto-creating session on attach");
                let fresh = self.spawn_session(id, CreateOptions::default())?;
                sessions = self.sessions.write().await;
                let raced = sessions.get(id).cloned();
                match raced {
                    Some(session) => {
                        spare = Some(fresh.0);
                        session
                    }
                    None => self.register(&mut sessions, fresh),
                }
            }
        };
        let mut state = session.state.lock().await;
        drop(sessions);

        state.viewers.insert(viewer.clone());
        if options.defer_replay {
            state.pending_replay.insert(viewer);
        } else {
            state.replay_to(&session.id, &viewer);
        }
        state.touch();

        info!(
            session = %id,
            clients = state.viewers.len(),
            deferred = options.defer_replay,
            "viewer attached"
        );
        let info = session.info(&state);
        drop(state);

        if let Some(spare) = spare {
            discard(spare).await;
        }
        Ok(info)
    }

    /// Send the full scrollback of `id` to `viewer`. No-op for unknown ids.
    pub async fn replay_buffer(&self, id: &str, viewer: &ViewerRef) {
        if let Ok(session) = self.lookup(id).await {
            session.state.lock().await.replay_to(&session.id, viewer);
        }
    }

    /// Remove a viewer. The process keeps running.
    pub async fn detach(&self, id: &str, viewer: &ViewerRef) {
        let Ok(session) = self.lookup(id).await else {
            return;
        };
        let mut state = session.state.lock().await;
        state.viewers.remove(viewer);
        state.pending_replay.remove(viewer);
        state.touch();
        info!(session = %id, clients = state.viewers.len(), "viewer detached");
    }

    /// Terminate a session: exit notice and close for every viewer, kill the
    /// process, drop the scrollback. No-op for unknown ids.
    pub async fn kill(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            destroy(session).await;
        }
    }

    pub async fn kill_all(&self) {
        let drained: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "killing all sessions");
        }
        for session in drained {
            destroy(session).await;
        }
    }

    /// Metadata for every live session, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let state = session.state.lock().await;
            infos.push(session.info(&state));
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        let session = self.lookup(id).await.ok()?;
        let state = session.state.lock().await;
        Some(session.info(&state))
    }

    pub async fn has(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Current scrollback contents of a session.
    pub async fn scrollback(&self, id: &str) -> Option<String> {
        let session = self.lookup(id).await.ok()?;
        let contents = session.state.lock().await.buffer.contents();
        Some(contents)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn lookup(&self, id: &str) -> Result<Arc<Session>, MuxError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MuxError::NotFound(id.to_string()))
    }
}

fn validate_id(id: &str) -> Result<(), MuxError> {
    if id.trim().is_empty() {
        return Err(MuxError::Validation(
            "session id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Drain process output into the scrollback and out to attached viewers.
/// Returns when the output stream ends.
async fn run_pump(session: Arc<Session>, mut output: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut decoder = Utf8StreamDecoder::new();
    while let Some(chunk) = output.recv().await {
        let text = decoder.decode(&chunk);
        ingest(&session, text).await;
    }
    ingest(&session, decoder.finish()).await;
}

async fn ingest(session: &Session, text: String) {
    if text.is_empty() {
        return;
    }
    let mut state = session.state.lock().await;
    state.buffer.write(&text);
    state.touch();
    state.broadcast(&session.id, &ViewerMessage::output(text));
}

async fn on_process_exit(sessions: &RwLock<SessionMap>, session: &Arc<Session>) {
    let mut sessions = sessions.write().await;
    let state = session.state.lock().await;
    if !is_registered(&sessions, session) {
        // Already killed
        return;
    }
    info!(session = %session.id, clients = state.viewers.len(), "session process exited");
    state.broadcast(&session.id, &ViewerMessage::exit());
    drop(state);
    unregister(&mut sessions, session);
}

fn is_registered(sessions: &SessionMap, session: &Arc<Session>) -> bool {
    sessions
        .get(&session.id)
        .is_some_and(|current| Arc::ptr_eq(current, session))
}

/// Remove `session` only if the id still maps to this very session; the id
/// may have been reused after a kill.
fn unregister(sessions: &mut SessionMap, session: &Arc<Session>) -> bool {
    let registered = is_registered(sessions, session);
    if registered {
        sessions.remove(&session.id);
    }
    registered
}

/// Task boundary around a session's pump. A finished pump means the process
/// exited; a panicked one tears the session down like `kill`.
async fn supervise(sessions: Arc<RwLock<SessionMap>>, session: Arc<Session>, pump: JoinHandle<()>) {
    match pump.await {
        Ok(()) => on_process_exit(&sessions, &session).await,
        Err(e) if e.is_cancelled() => {
            debug!(session = %session.id, "output pump cancelled");
        }
        Err(e) => {
            error!(session = %session.id, "output pump panicked: {}", e);
            let removed = unregister(&mut *sessions.write().await, &session);
            if removed {
                destroy(session).await;
            }
        }
    }
}

/// Kill a process that lost the race to register its id.
async fn discard(session: Arc<Session>) {
    debug!(session = %session.id, "id registered concurrently, discarding spawned process");
    if let Err(e) = session.pty.kill(KillSignal::Kill).await {
        warn!(session = %session.id, "failed to kill discarded process: {}", e);
    }
}

async fn destroy(session: Arc<Session>) {
    session.stop_pump();
    session.state.lock().await.teardown(&session.id);
    if let Err(e) = session.pty.kill(KillSignal::Kill).await {
        warn!(session = %session.id, "failed to kill session process: {}", e);
    }
    info!(session = %session.id, "session killed");
}
