//! The session-wide published state: `clientId`, `connectTimeout`, and the
//! monotonic message counter (§3, §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;

/// The `(clientId, connectTimeout)` pair, published together so that every
/// reader always observes a consistent pairing (§5).
#[derive(Debug, Clone)]
pub(crate) struct HandshakeState {
    pub(crate) client_id: String,
    pub(crate) connect_timeout: Option<Duration>,
}

/// Holds the handshake-derived state and the per-handshake message counter.
///
/// `client_id`/`connect_timeout` are mutated only from the handshake path
/// (the initial synchronous handshake, or the Connector after recovery) and
/// read by every outbound worker when composing payloads.
#[derive(Debug)]
pub(crate) struct SharedState {
    handshake: ArcSwap<Option<HandshakeState>>,
    message_counter: AtomicU64,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            handshake: ArcSwap::from_pointee(None),
            message_counter: AtomicU64::new(1),
        }
    }

    /// Publish a freshly obtained `clientId`, with no known `connectTimeout`
    /// yet (set once the initial connect completes).
    pub(crate) fn set_client_id(&self, client_id: String) {
        self.handshake.store(std::sync::Arc::new(Some(HandshakeState {
            client_id,
            connect_timeout: None,
        })));
    }

    /// Publish the server-advised connect timeout learned from the initial
    /// connect (§4.1).
    pub(crate) fn set_connect_timeout(&self, timeout: Duration) {
        let current = self.handshake.load_full();
        if let Some(state) = current.as_ref() {
            self.handshake.store(std::sync::Arc::new(Some(HandshakeState {
                client_id: state.client_id.clone(),
                connect_timeout: Some(timeout),
            })));
        }
    }

    /// The current `clientId`, if a handshake has completed.
    pub(crate) fn client_id(&self) -> Option<String> {
        self.handshake
            .load_full()
            .as_ref()
            .as_ref()
            .map(|state| state.client_id.clone())
    }

    /// The current server-advised connect timeout, if known.
    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.handshake
            .load_full()
            .as_ref()
            .as_ref()
            .and_then(|state| state.connect_timeout)
    }

    /// Reset the message counter to 1, per handshake (invariant 5).
    pub(crate) fn reset_message_counter(&self) {
        self.message_counter.store(1, Ordering::Release);
    }

    /// The next `id` to stamp on an outbound request, advancing the counter
    /// by exactly one (invariant 5).
    pub(crate) fn next_message_id(&self) -> String {
        self.message_counter
            .fetch_add(1, Ordering::AcqRel)
            .to_string()
    }
}
