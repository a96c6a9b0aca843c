//! Viewer channels: the outbound side of an attached client connection.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::ViewerError;

/// Exit code reported for both `kill` and natural process exit.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Messages pushed to attached viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerMessage {
    /// Raw decoded terminal output, control sequences untouched
    Output { data: String },
    /// The session's process is gone
    Exit { code: i32 },
}

impl ViewerMessage {
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output { data: data.into() }
    }

    pub fn exit() -> Self {
        Self::Exit {
            code: EXIT_CODE_UNKNOWN,
        }
    }

    /// Wire form for the transport boundary.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// An attached client connection.
///
/// Both methods must not block; either may fail independently at any time.
pub trait Viewer: Send + Sync {
    fn send(&self, message: &ViewerMessage) -> Result<(), ViewerError>;
    fn close(&self) -> Result<(), ViewerError>;
}

/// Shared reference to a viewer, compared and hashed by identity.
#[derive(Clone)]
pub struct ViewerRef(Arc<dyn Viewer>);

impl ViewerRef {
    pub fn new(viewer: impl Viewer + 'static) -> Self {
        Self(Arc::new(viewer))
    }

    pub fn from_arc(viewer: Arc<dyn Viewer>) -> Self {
        Self(viewer)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl<V: Viewer + 'static> From<Arc<V>> for ViewerRef {
    fn from(viewer: Arc<V>) -> Self {
        Self(viewer)
    }
}

impl Deref for ViewerRef {
    type Target = dyn Viewer;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for ViewerRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ViewerRef {}

impl Hash for ViewerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl std::fmt::Debug for ViewerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ViewerRef({:#x})", self.addr())
    }
}

/// Viewer backed by an unbounded tokio channel, e.g. the outbound queue of a
/// websocket task. `close` drops the sender so the receiver sees end-of-stream
/// once it has drained.
pub struct ChannelViewer {
    tx: Mutex<Option<mpsc::UnboundedSender<ViewerMessage>>>,
}

impl ChannelViewer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl Viewer for ChannelViewer {
    fn send(&self, message: &ViewerMessage) -> Result<(), ViewerError> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| ViewerError::Transport("viewer lock poisoned".into()))?;
        match guard.as_ref() {
            Some(tx) => tx.send(message.clone()).map_err(|_| ViewerError::Closed),
            None => Err(ViewerError::Closed),
        }
    }

    fn close(&self) -> Result<(), ViewerError> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| ViewerError::Transport("viewer lock poisoned".into()))?;
        guard.take().map(drop).ok_or(ViewerError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn wire_format() {
        assert_eq!(
            ViewerMessage::output("hi\r\n").to_json(),
            r#"{"type":"output","data":"hi\r\n"}"#
        );
        assert_eq!(ViewerMessage::exit().to_json(), r#"{"type":"exit","code":-1}"#);

        let back: ViewerMessage = serde_json::from_str(r#"{"type":"exit","code":-1}"#).unwrap();
        assert_eq!(back, ViewerMessage::exit());
    }

    #[test]
    fn identity_membership() {
        let (a, _rx_a) = ChannelViewer::new();
        let (b, _rx_b) = ChannelViewer::new();
        let a = ViewerRef::new(a);
        let b = ViewerRef::new(b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&a));
        assert!(!set.contains(&b));
        assert_ne!(a, b);

        let (c, _rx_c) = ChannelViewer::new();
        let shared: Arc<dyn Viewer> = Arc::new(c);
        assert_eq!(ViewerRef::from_arc(shared.clone()), ViewerRef::from_arc(shared));
    }

    #[tokio::test]
    async fn channel_viewer_delivers_then_closes() {
        let (viewer, mut rx) = ChannelViewer::new();
        viewer.send(&ViewerMessage::output("x")).unwrap();
        viewer.close().unwrap();

        assert_eq!(rx.recv().await, Some(ViewerMessage::output("x")));
        assert_eq!(rx.recv().await, None);
        assert_eq!(viewer.send(&ViewerMessage::exit()), Err(ViewerError::Closed));
        assert_eq!(viewer.close(), Err(ViewerError::Closed));
    }

    #[test]
    fn send_after_receiver_dropped_fails() {
        let (viewer, rx) = ChannelViewer::new();
        drop(rx);
        assert_eq!(
            viewer.send(&ViewerMessage::output("x")),
            Err(ViewerError::Closed)
        );
    }
}
