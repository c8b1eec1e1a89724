// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Websocket connection with automatic reconnection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ConnectionError;

use super::{
    Connection, ConnectionState, Frame, FrameHandler, LinkControl, ReconnectionPolicy, redact_uri,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// How a single link ended.
enum LinkEnd {
    Stopped,
    Disconnected,
}

/// A websocket [`Connection`].
///
/// On an unexpected closure the connection redials according to its
/// [`ReconnectionPolicy`] and keeps delivering frames to the same handler.
/// A stop request is honoured at the next frame or redial boundary; it never
/// cuts a frame in half.
///
/// Usually created through a
/// [`WebSocketConnectionFactory`](super::WebSocketConnectionFactory).
pub struct WebSocketConnection {
    uri: String,
    reconnection: ReconnectionPolicy,
    connect_timeout: Duration,
    control: LinkControl,
    writer: Mutex<Option<WsWriter>>,
}

impl WebSocketConnection {
    /// Creates a connection to the given full websocket URI.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            reconnection: ReconnectionPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            control: LinkControl::new(),
            writer: Mutex::new(None),
        }
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets the timeout of each connection attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the full target URI, credential included.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Dials the endpoint and installs the writer half.
    ///
    /// Returns `None` if a stop is requested before the dial completes.
    async fn dial(&self) -> Option<Result<WsReader, ConnectionError>> {
        let attempt = async {
            let (stream, _response) =
                tokio::time::timeout(self.connect_timeout, connect_async(self.uri.as_str()))
                    .await
                    .map_err(|_| {
                        ConnectionError::Timeout(
                            u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                        )
                    })?
                    .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
            let (writer, reader) = stream.split();
            *self.writer.lock().await = Some(writer);
            Ok::<_, ConnectionError>(reader)
        };

        tokio::select! {
            biased;
            () = self.control.stopped() => None,
            result = attempt => Some(result),
        }
    }

    /// Delivers frames to `handler` until the link ends.
    async fn pump(&self, reader: &mut WsReader, handler: &dyn FrameHandler) -> LinkEnd {
        loop {
            let message = tokio::select! {
                biased;
                () = self.control.stopped() => return LinkEnd::Stopped,
                message = reader.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => handler.handle(Frame::from(text)).await,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => handler.handle(Frame::from(text)).await,
                    Err(_) => tracing::debug!(
                        uri = %redact_uri(&self.uri),
                        "Dropping non-UTF-8 binary frame"
                    ),
                },
                Some(Ok(Message::Close(close))) => {
                    tracing::debug!(uri = %redact_uri(&self.uri), ?close, "Peer closed websocket");
                    return LinkEnd::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(uri = %redact_uri(&self.uri), error = %e, "Websocket receive error");
                    return LinkEnd::Disconnected;
                }
                None => return LinkEnd::Disconnected,
            }
        }
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            tracing::debug!(uri = %redact_uri(&self.uri), error = %e, "Error closing websocket");
        }
    }

    /// Redials until a link is up. Returns `None` when the loop should end.
    async fn redial(&self, attempt: &mut u32) -> Option<WsReader> {
        let uri = redact_uri(&self.uri);
        loop {
            if !self.reconnection.should_retry(*attempt) {
                tracing::warn!(%uri, attempts = *attempt, "Giving up reconnecting");
                return None;
            }

            let delay = self.reconnection.delay_for_attempt(*attempt);
            *attempt += 1;
            self.control
                .set_state(ConnectionState::Reconnecting { attempt: *attempt });

            tokio::select! {
                biased;
                () = self.control.stopped() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match self.dial().await? {
                Ok(reader) => {
                    tracing::info!(%uri, attempt = *attempt, "Reconnected");
                    return Some(reader);
                }
                Err(e) => {
                    tracing::warn!(%uri, attempt = *attempt, error = %e, "Reconnection attempt failed");
                }
            }
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn connect(&self, handler: Arc<dyn FrameHandler>) -> Result<(), ConnectionError> {
        let _active = self.control.begin()?;
        let uri = redact_uri(&self.uri);

        if self.control.is_stop_requested() {
            tracing::debug!(%uri, "Connection stopped before connect");
            return Ok(());
        }

        self.control.set_state(ConnectionState::Connecting);
        let Some(initial) = self.dial().await else {
            return Ok(());
        };
        let mut reader = initial?;
        tracing::info!(%uri, "Connected");

        loop {
            if !self.control.is_stop_requested() {
                self.control.set_state(ConnectionState::Connected);
            }

            let end = self.pump(&mut reader, handler.as_ref()).await;
            self.close_writer().await;

            if matches!(end, LinkEnd::Stopped) || self.control.is_stop_requested() {
                tracing::info!(%uri, "Connection stopped");
                break;
            }
            if !self.reconnection.is_enabled() {
                tracing::info!(%uri, "Connection closed by peer");
                break;
            }

            tracing::warn!(%uri, "Connection lost, reconnecting");
            let mut attempt = 0;
            match self.redial(&mut attempt).await {
                Some(next) => reader = next,
                None => break,
            }
        }

        self.close_writer().await;
        Ok(())
    }

    async fn send_message(&self, frame: &str) {
        if self.control.is_stop_requested() {
            return;
        }

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            tracing::trace!(uri = %redact_uri(&self.uri), "Dropping outgoing frame: not connected");
            return;
        };

        if let Err(e) = sink.send(Message::Text(frame.to_owned())).await {
            tracing::warn!(uri = %redact_uri(&self.uri), error = %e, "Failed to send frame");
        }
    }

    async fn stop(&self) {
        if self.control.request_stop() {
            tracing::info!(uri = %redact_uri(&self.uri), "Stop requested");
        }
        self.close_writer().await;
    }

    fn state(&self) -> ConnectionState {
        self.control.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.control.watch_state()
    }
}

impl fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("uri", &redact_uri(&self.uri))
            .field("state", &self.state())
            .field("reconnection", &self.reconnection.is_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Discard;

    #[async_trait]
    impl FrameHandler for Discard {
        async fn handle(&self, _frame: Frame) {}
    }

    #[test]
    fn new_is_idle() {
        let connection = WebSocketConnection::new("ws://localhost:8765?token=t&deviceid=d");
        assert_eq!(connection.state(), ConnectionState::Idle);
        assert_eq!(connection.uri(), "ws://localhost:8765?token=t&deviceid=d");
    }

    #[test]
    fn debug_redacts_credential() {
        let connection = WebSocketConnection::new("ws://localhost:8765?token=secret&deviceid=d");
        let debug = format!("{connection:?}");
        assert!(debug.contains("ws://localhost:8765"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn send_before_connect_is_noop() {
        let connection = WebSocketConnection::new("ws://127.0.0.1:1");
        connection.send_message("ignored").await;
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn stop_before_connect_returns_immediately() {
        let connection = WebSocketConnection::new("ws://127.0.0.1:1");
        connection.stop().await;
        connection.stop().await;

        connection.connect(Arc::new(Discard)).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn initial_connect_failure_is_an_error() {
        let connection = WebSocketConnection::new("ws://127.0.0.1:1")
            .with_connect_timeout(Duration::from_secs(5));

        let err = connection.connect(Arc::new(Discard)).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::ConnectionFailed(_) | ConnectionError::Timeout(_)
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}
