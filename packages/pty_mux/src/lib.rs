//! pty_mux - In-process PTY session multiplexer
//!
//! Owns shell processes, keeps a bounded scrollback of their output and fans
//! that output out to any number of attached viewers. Viewers can join late
//! and either get the scrollback replayed immediately or once the session
//! learns their terminal geometry through its first resize.
//!
//! # Example
//!
//! ```no_run
//! use pty_mux::{AttachOptions, ChannelViewer, CreateOptions, MuxConfig, SessionManager, ViewerRef};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = SessionManager::new(MuxConfig::default());
//!
//!     manager.create("build", CreateOptions::default()).await.unwrap();
//!
//!     let (viewer, mut rx) = ChannelViewer::new();
//!     let viewer = ViewerRef::new(viewer);
//!     manager
//!         .attach("build", viewer.clone(), AttachOptions { defer_replay: true })
//!         .await
//!         .unwrap();
//!
//!     // The client reports its size; this also triggers the deferred replay
//!     manager.resize("build", 120, 40).await.unwrap();
//!     manager.write("build", "echo hello\n").await.unwrap();
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("{}", message.to_json());
//!     }
//! }
//! ```

pub mod config;
mod decode;
mod error;
mod manager;
pub mod pty;
mod scrollback;
mod session;
mod shell;
#[cfg(test)]
mod test_support;
mod viewer;

pub use config::{MuxConfig, load_config};
pub use decode::Utf8StreamDecoder;
pub use error::{MuxError, PtyError, ViewerError};
pub use manager::SessionManager;
pub use pty::{KillSignal, NativeSpawner, PtyConfig, PtyHandle, PtySpawner, PtyState, SpawnedPty};
pub use scrollback::ScrollbackBuffer;
pub use session::{AttachOptions, CreateOptions, SessionInfo};
pub use shell::ShellResolver;
pub use viewer::{ChannelViewer, EXIT_CODE_UNKNOWN, Viewer, ViewerMessage, ViewerRef};
