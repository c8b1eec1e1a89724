// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Long-lived connections that deliver telemetry frames.
//!
//! A [`Connection`] is one logical link to a remote endpoint. Calling
//! [`connect`](Connection::connect) establishes the link and then blocks,
//! handing every received text frame to a [`FrameHandler`] until the link
//! closes for good or [`stop`](Connection::stop) is called.
//!
//! # Implementations
//!
//! - [`WebSocketConnection`]: websocket transport with automatic
//!   reconnection (feature `websocket`, enabled by default)
//! - [`LoopbackConnection`]: in-memory connection that echoes sent frames
//!   back to the handler, for tests and offline development
//!
//! Connections are built by a [`ConnectionFactory`], which turns a
//! credential and a device id into a ready-to-connect (but not yet
//! connected) [`Connection`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect──► Connecting ──► Connected ──stop──► Stopping ──► Closed
//!                                    │    ▲
//!                          disconnect│    │redial
//!                                    ▼    │
//!                              Reconnecting { attempt }
//! ```

mod factory;
mod loopback;
mod reconnect;
mod state;
#[cfg(feature = "websocket")]
mod websocket;

pub use factory::{ConnectionFactory, LinkType};
#[cfg(feature = "websocket")]
pub use factory::{WebSocketConnectionFactory, WebSocketConnectionFactoryBuilder};
pub use loopback::{LoopbackConnection, LoopbackConnectionFactory};
pub use reconnect::ReconnectionPolicy;
pub use state::ConnectionState;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;

pub(crate) use state::LinkControl;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ConnectionError;

/// One discrete unit of text received from or sent to a transport.
///
/// Frames are opaque to this library. They are reference counted so a
/// single received frame can be handed to many subscribers without copying.
pub type Frame = Arc<str>;

/// Receives the frames delivered by a [`Connection`].
///
/// The connection awaits `handle` before it reads the next frame, so a slow
/// handler applies backpressure to the transport.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handles one received frame.
    async fn handle(&self, frame: Frame);
}

/// A single logical link to a remote endpoint.
///
/// All methods take `&self`: a connection is shared between the task that
/// drives [`connect`](Self::connect) and any number of callers of
/// [`send_message`](Self::send_message) and [`stop`](Self::stop).
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Establishes the link and delivers every received frame to `handler`.
    ///
    /// Blocks until the link ends: the transport closes (and, for
    /// reconnecting implementations, cannot be re-established) or
    /// [`stop`](Self::stop) is called. If `stop` was called before
    /// `connect`, returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial link cannot be established, or if the
    /// connection is already driving a receive loop. Later disconnects are
    /// never reported as errors.
    async fn connect(&self, handler: Arc<dyn FrameHandler>) -> Result<(), ConnectionError>;

    /// Sends a frame over the link.
    ///
    /// Silently does nothing when the link is not connected, including
    /// before `connect` and after `stop`.
    async fn send_message(&self, frame: &str);

    /// Requests termination of the link.
    ///
    /// Safe to call at any time and any number of times. A receive loop
    /// blocked on the transport is woken; a handler that is already running
    /// is allowed to finish.
    async fn stop(&self);

    /// Returns the current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Returns a receiver that observes lifecycle state changes.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}

/// Redacts the query string of a connection URI for logging.
///
/// Target URIs carry the credential as a query parameter.
pub(crate) fn redact_uri(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_uri_strips_query() {
        assert_eq!(
            redact_uri("wss://api.example.com/live?token=secret&deviceid=abc"),
            "wss://api.example.com/live"
        );
        assert_eq!(redact_uri("ws://localhost:8765"), "ws://localhost:8765");
    }
}
