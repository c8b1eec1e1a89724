// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory connection that loops sent frames back to its handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot, watch};

use crate::device::DeviceId;
use crate::error::ConnectionError;

use super::{Connection, ConnectionFactory, ConnectionState, Frame, FrameHandler, LinkControl};

/// An in-memory [`Connection`].
///
/// While connected, [`send_message`](Connection::send_message) queues the
/// frame for the receive loop and returns once the handler has finished
/// with it, which makes delivery deterministic in tests. Frames from
/// concurrent senders are handled one after the other. `connect` blocks until
/// [`stop`](Connection::stop) like a real transport.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use scadable::connection::{Connection, ConnectionState, LoopbackConnection};
/// use scadable::Device;
///
/// # async fn example() -> scadable::Result<()> {
/// let connection = Arc::new(LoopbackConnection::new());
/// let device = Arc::new(Device::new("abc", Some(connection.clone() as Arc<dyn Connection>)));
///
/// device.on_raw_telemetry(|frame| async move {
///     println!("received {frame}");
/// })?;
///
/// let running = tokio::spawn({
///     let device = device.clone();
///     async move { device.start().await }
/// });
///
/// let mut state = connection.watch_state();
/// let _ = state.wait_for(ConnectionState::is_connected).await;
/// connection.send_message("hello").await;
///
/// device.stop().await;
/// running.await.expect("task panicked")?;
/// # Ok(())
/// # }
/// ```
pub struct LoopbackConnection {
    control: LinkControl,
    inbox: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    reconnect: bool,
    disconnects: Notify,
    reconnect_count: AtomicU32,
}

/// A frame queued for the receive loop, acknowledged once handled.
type Delivery = (Frame, oneshot::Sender<()>);

impl LoopbackConnection {
    /// Creates a loopback connection that reconnects after a simulated
    /// disconnect.
    #[must_use]
    pub fn new() -> Self {
        Self {
            control: LinkControl::new(),
            inbox: Mutex::new(None),
            reconnect: true,
            disconnects: Notify::new(),
            reconnect_count: AtomicU32::new(0),
        }
    }

    /// Creates a loopback connection whose receive loop ends on the first
    /// simulated disconnect.
    #[must_use]
    pub fn without_reconnection() -> Self {
        Self {
            reconnect: false,
            ..Self::new()
        }
    }

    /// Simulates an unexpected transport closure.
    ///
    /// Does nothing unless the connection is currently connected.
    pub fn simulate_disconnect(&self) {
        if self.control.state().is_connected() {
            self.disconnects.notify_one();
        }
    }

    /// Returns how many times the link was re-established.
    #[must_use]
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Acquire)
    }
}

impl Default for LoopbackConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn connect(&self, handler: Arc<dyn FrameHandler>) -> Result<(), ConnectionError> {
        let _active = self.control.begin()?;
        if self.control.is_stop_requested() {
            return Ok(());
        }

        self.control.set_state(ConnectionState::Connecting);
        let (sender, mut inbox) = mpsc::unbounded_channel::<Delivery>();
        *self.inbox.lock() = Some(sender);
        self.control.set_state(ConnectionState::Connected);
        tracing::debug!("Loopback connection established");

        loop {
            tokio::select! {
                biased;
                () = self.control.stopped() => break,
                () = self.disconnects.notified() => {
                    if !self.reconnect || self.control.is_stop_requested() {
                        tracing::debug!("Loopback connection closed");
                        break;
                    }
                    let attempt = self.reconnect_count.fetch_add(1, Ordering::AcqRel) + 1;
                    self.control.set_state(ConnectionState::Reconnecting { attempt });
                    tracing::debug!(attempt, "Loopback connection re-established");
                    self.control.set_state(ConnectionState::Connected);
                }
                Some((frame, ack)) = inbox.recv() => {
                    handler.handle(frame).await;
                    let _ = ack.send(());
                }
            }
        }

        // Frames still queued are dropped, which releases their senders.
        *self.inbox.lock() = None;
        inbox.close();
        while inbox.try_recv().is_ok() {}
        Ok(())
    }

    /// Queues the frame for the receive loop and waits until it has been
    /// handled.
    ///
    /// Frames are handled one at a time in the order they were queued, so
    /// calling this from inside the handler itself never returns.
    async fn send_message(&self, frame: &str) {
        if self.control.is_stop_requested() {
            return;
        }
        let Some(sender) = self.inbox.lock().clone() else {
            return;
        };

        let (ack, handled) = oneshot::channel();
        if sender.send((Frame::from(frame), ack)).is_ok() {
            let _ = handled.await;
        }
    }

    async fn stop(&self) {
        self.control.request_stop();
    }

    fn state(&self) -> ConnectionState {
        self.control.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.control.watch_state()
    }
}

impl std::fmt::Debug for LoopbackConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackConnection")
            .field("state", &self.state())
            .field("reconnect", &self.reconnect)
            .field("reconnect_count", &self.reconnect_count())
            .finish_non_exhaustive()
    }
}

/// A factory that creates [`LoopbackConnection`]s and records every request.
#[derive(Debug, Default)]
pub struct LoopbackConnectionFactory {
    requests: Mutex<Vec<(String, DeviceId)>>,
}

impl LoopbackConnectionFactory {
    /// Creates a new factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (credential, device id) pairs connections were created for.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, DeviceId)> {
        self.requests.lock().clone()
    }
}

impl ConnectionFactory for LoopbackConnectionFactory {
    fn create_connection(&self, credential: &str, device_id: &DeviceId) -> Arc<dyn Connection> {
        self.requests
            .lock()
            .push((credential.to_string(), device_id.clone()));
        Arc::new(LoopbackConnection::new())
    }
}
