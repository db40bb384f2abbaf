// # Session Slot
//
// Single-slot, latest-value handoff of sessions to the dispatcher.
//
// The configuration path opens a new session whenever settings or
// credentials change and publishes it here. The dispatcher reads the
// latest value once per batch; a batch already in flight keeps its own
// `Arc` to the session it started with. A replaced session is only logged
// out by [`retire_session`] once that batch has released it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::traits::SmcApi;

/// A session shared between the publisher and the dispatcher
pub type SharedSession = Arc<dyn SmcApi>;

/// Publishing side of the slot
///
/// Clones publish into the same slot.
#[derive(Clone)]
pub struct SessionSlot {
    tx: Arc<watch::Sender<Option<SharedSession>>>,
}

impl SessionSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current session, returning the previous one
    pub fn publish(&self, session: SharedSession) -> Option<SharedSession> {
        self.tx.send_replace(Some(session))
    }

    /// Empty the slot, returning the previous session
    pub fn clear(&self) -> Option<SharedSession> {
        self.tx.send_replace(None)
    }

    /// The session currently in the slot
    pub fn current(&self) -> Option<SharedSession> {
        self.tx.borrow().clone()
    }

    /// Create a receiving handle
    pub fn subscribe(&self) -> SessionReceiver {
        SessionReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the slot
pub struct SessionReceiver {
    rx: watch::Receiver<Option<SharedSession>>,
}

impl SessionReceiver {
    /// The latest published session
    pub fn latest(&self) -> Option<SharedSession> {
        self.rx.borrow().clone()
    }

    /// The latest session if it is authenticated, marking the value seen
    pub fn authenticated(&mut self) -> Option<SharedSession> {
        self.rx
            .borrow_and_update()
            .as_ref()
            .filter(|session| session.is_authenticated())
            .cloned()
    }

    /// Wait until a new value is published
    ///
    /// Returns `false` once every publisher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Log out a replaced session once nothing else holds it
///
/// `session` must be the handle returned by [`SessionSlot::publish`]. The
/// batch that took the old session keeps using it until it completes; the
/// logout waits for that `Arc` to be dropped, checking every `poll`.
pub async fn retire_session(session: SharedSession, poll: Duration) {
    while Arc::strong_count(&session) > 1 {
        tokio::time::sleep(poll).await;
    }
    debug!("Replaced SMC session released, logging out");
    session.logout().await;
}
