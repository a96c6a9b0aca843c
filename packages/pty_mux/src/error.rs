//! Error types for the registry, the PTY collaborator, and viewer transports.

/// Errors returned to callers of the session registry.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("invalid session id: {0}")]
    Validation(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("shell not found: {0}")]
    ShellNotFound(String),

    #[error("no shell available (tried: {})", tried.join(", "))]
    NoShellAvailable { tried: Vec<String> },

    #[error("failed to spawn session process: {0}")]
    Spawn(#[from] PtyError),
}

impl MuxError {
    /// Stable machine-readable code for the transport layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::ShellNotFound(_) => "shell_not_found",
            Self::NoShellAvailable { .. } => "no_shell_available",
            Self::Spawn(_) => "spawn_failure",
        }
    }
}

/// Errors that can occur during PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// Failed to create PTY
    #[error("failed to create PTY: {0}")]
    CreateFailed(String),
    /// Failed to write to PTY
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),
    /// Failed to resize PTY
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),
    /// The process primitive has no notion of geometry
    #[error("PTY does not support resize")]
    ResizeUnsupported,
    /// Failed to kill PTY process
    #[error("failed to kill PTY: {0}")]
    KillFailed(String),
    /// Channel communication error
    #[error("channel error: {0}")]
    ChannelError(String),
}

impl From<anyhow::Error> for PtyError {
    fn from(err: anyhow::Error) -> Self {
        PtyError::CreateFailed(format!("{err:#}"))
    }
}

/// Per-viewer transport failures. Always caught and logged by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewerError {
    #[error("viewer channel closed")]
    Closed,

    #[error("viewer transport error: {0}")]
    Transport(String),
}
