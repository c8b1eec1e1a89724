// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection lifecycle state and the shared stop/state plumbing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ConnectionError;

/// Lifecycle state of a [`Connection`](super::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `connect` has not been called yet.
    Idle,
    /// The initial link is being established.
    Connecting,
    /// The link is up and frames are being delivered.
    Connected,
    /// The link dropped and is being re-established.
    Reconnecting {
        /// Reconnection attempt number, starting at 1.
        attempt: u32,
    },
    /// A stop was requested and the receive loop is winding down.
    Stopping,
    /// The receive loop has ended.
    Closed,
}

impl ConnectionState {
    /// Returns true if frames can currently be sent and received.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true once the receive loop has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Stopping => f.write_str("stopping"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Stop flag, state channel and single-loop guard shared by connection
/// implementations.
///
/// The stop flag is sticky: once set it is never cleared, so a stop raised
/// at any point (before `connect`, mid-redial, mid-frame) is observed at the
/// next boundary the receive loop checks.
#[derive(Debug)]
pub(crate) struct LinkControl {
    state: watch::Sender<ConnectionState>,
    stop: watch::Sender<bool>,
    active: AtomicBool,
}

impl LinkControl {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (stop, _) = watch::channel(false);
        Self {
            state,
            stop,
            active: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Raises the stop flag. Returns `false` if it was already raised.
    pub(crate) fn request_stop(&self) -> bool {
        let newly_requested = !self.stop.send_replace(true);
        if newly_requested && self.active.load(Ordering::Acquire) {
            self.set_state(ConnectionState::Stopping);
        }
        newly_requested
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once a stop has been requested.
    pub(crate) async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        // The sender outlives `rx`, so this only returns once the flag is set.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Claims the receive loop. The returned guard marks the link closed
    /// when dropped, including when the `connect` future is cancelled.
    pub(crate) fn begin(&self) -> Result<ActiveLoop<'_>, ConnectionError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConnectionError::AlreadyConnected);
        }
        Ok(ActiveLoop { control: self })
    }
}

pub(crate) struct ActiveLoop<'a> {
    control: &'a LinkControl,
}

impl Drop for ActiveLoop<'_> {
    fn drop(&mut self) {
        self.control.set_state(ConnectionState::Closed);
        self.control.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Idle).unwrap();
        assert_eq!(json, "\"idle\"");
        let json = serde_json::to_string(&ConnectionState::Reconnecting { attempt: 2 }).unwrap();
        assert_eq!(json, r#"{"reconnecting":{"attempt":2}}"#);
    }

    #[test]
    fn stop_is_sticky_and_idempotent() {
        let control = LinkControl::new();
        assert!(!control.is_stop_requested());
        assert!(control.request_stop());
        assert!(!control.request_stop());
        assert!(control.is_stop_requested());
        // Not active, so the state is left alone
        assert_eq!(control.state(), ConnectionState::Idle);
    }

    #[test]
    fn begin_rejects_second_loop() {
        let control = LinkControl::new();
        let guard = control.begin().unwrap();
        assert_eq!(control.begin().err(), Some(ConnectionError::AlreadyConnected));
        drop(guard);
        assert_eq!(control.state(), ConnectionState::Closed);
        assert!(control.begin().is_ok());
    }

    #[tokio::test]
    async fn stopped_resolves_after_request() {
        let control = std::sync::Arc::new(LinkControl::new());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.stopped().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        control.request_stop();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_when_already_requested() {
        let control = LinkControl::new();
        control.request_stop();
        control.stopped().await;
    }
}
