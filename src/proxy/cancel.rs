//! Client disconnect to upstream cancellation
//!
//! A [`CancellationBridge`] is created per proxied call. It owns the
//! [`CancellationToken`] the upstream call watches and the [`RelayState`] that
//! records how the call ended. Two client signals drive it:
//!
//! - the request is abandoned before a response was handed back
//!   ([`CancellationBridge::client_aborted`], usually via [`AbortGuard`])
//! - the response stream closes ([`CancellationBridge::response_closed`]),
//!   which only cancels while the relay is still `Streaming`
//!
//! The second check is what keeps a normal close after a fully written
//! response from being mistaken for a client abort.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// How a proxied call is progressing or how it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayState {
    /// Upstream call not yet started
    Idle = 0,
    Streaming = 1,
    CompletedNormally = 2,
    Aborted = 3,
    Failed = 4,
}

impl RelayState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RelayState::Idle,
            1 => RelayState::Streaming,
            2 => RelayState::CompletedNormally,
            3 => RelayState::Aborted,
            _ => RelayState::Failed,
        }
    }

    /// Terminal states have no outgoing transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelayState::CompletedNormally | RelayState::Aborted | RelayState::Failed
        )
    }

    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::Idle => "idle",
            RelayState::Streaming => "streaming",
            RelayState::CompletedNormally => "completed",
            RelayState::Aborted => "aborted",
            RelayState::Failed => "failed",
        }
    }
}

/// Links client lifecycle signals to the upstream cancellation token.
///
/// Cheap to clone; clones share the token and the state.
#[derive(Debug, Clone, Default)]
pub struct CancellationBridge {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl CancellationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to the upstream call
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> RelayState {
        RelayState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the token has been set
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Idle -> Streaming. Returns false if the call already ended (e.g. the
    /// client aborted while the upstream request was being prepared).
    pub fn begin_streaming(&self) -> bool {
        self.state
            .compare_exchange(
                RelayState::Idle as u8,
                RelayState::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move into a terminal state unless one was already reached.
    ///
    /// Returns the state the call actually ended in, which is the earlier
    /// terminal state if there was one.
    pub fn finish(&self, terminal: RelayState) -> RelayState {
        debug_assert!(terminal.is_terminal());
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if RelayState::from_u8(current).is_terminal() {
                return RelayState::from_u8(current);
            }
            match self.state.compare_exchange_weak(
                current,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return terminal,
                Err(actual) => current = actual,
            }
        }
    }

    /// Signal A: the client gave up before a response was handed back.
    pub fn client_aborted(&self) {
        if self.finish(RelayState::Aborted) == RelayState::Aborted {
            self.token.cancel();
        }
    }

    /// Signal B: the response stream towards the client closed.
    ///
    /// Only cancels while the relay is still streaming. A close after the
    /// response was fully written is normal teardown. Returns whether the
    /// token was set by this call.
    pub fn response_closed(&self) -> bool {
        let swapped = self
            .state
            .compare_exchange(
                RelayState::Streaming as u8,
                RelayState::Aborted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if swapped {
            self.token.cancel();
        }
        swapped
    }

    /// Guard that reports Signal A if dropped while still armed
    pub fn abort_guard(&self) -> AbortGuard {
        AbortGuard {
            bridge: self.clone(),
            armed: true,
        }
    }
}

/// Fires [`CancellationBridge::client_aborted`] when dropped while armed.
///
/// Held by a handler across the upstream request. hyper drops the handler
/// future when the client disconnects before the response is produced, which
/// drops the guard and cancels the upstream call.
#[derive(Debug)]
pub struct AbortGuard {
    bridge: CancellationBridge,
    armed: bool,
}

impl AbortGuard {
    /// The response was handed back; a later drop is not an abort.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            self.bridge.client_aborted();
        }
    }
}
