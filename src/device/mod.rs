// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Devices that receive live telemetry.
//!
//! A [`Device`] owns an optional [`Connection`] and two subscriber buses.
//! [`Device::start`] drives the connection's receive loop; every received
//! frame is fanned out to the raw bus, then to the parsed bus, and the next
//! frame is only read once every subscriber has finished with the current
//! one.
//!
//! ```no_run
//! use std::sync::Arc;
//! use scadable::connection::{ConnectionFactory, WebSocketConnectionFactory};
//! use scadable::{Device, DeviceId};
//!
//! # async fn example() -> scadable::Result<()> {
//! let factory = WebSocketConnectionFactory::new("api.scadable.com/live")?;
//! let device_id = DeviceId::from("pump-7");
//! let connection = factory.create_connection("my-api-key", &device_id);
//! let device = Device::new(device_id, Some(connection));
//!
//! device.on_raw_telemetry(|frame| async move {
//!     println!("raw: {frame}");
//! })?;
//!
//! // Blocks until the connection is stopped
//! device.start().await?;
//! # Ok(())
//! # }
//! ```

mod device_id;

pub use device_id::DeviceId;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::{Connection, Frame, FrameHandler};
use crate::error::{DeviceError, Error, Result};
use crate::event::{DeviceEvent, EventBus};
use crate::subscription::{Bus, BusKind, DispatchReport, Subscriber, SubscriptionId, subscriber};

/// A remote device whose live telemetry can be subscribed to.
///
/// Registration takes `&self`, so subscribers can be added from any task,
/// including while the receive loop is running; they receive frames from
/// the next dispatch on.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    connection: Option<Arc<dyn Connection>>,
    raw_bus: Arc<Bus>,
    parsed_bus: Arc<Bus>,
    next_subscription_id: AtomicU64,
    dispatch_timeout: Option<Duration>,
    running: AtomicBool,
    events: Option<EventBus>,
}

impl Device {
    /// Creates a device.
    ///
    /// A device without a connection cannot produce telemetry: registering
    /// subscribers on it and starting it both fail.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>, connection: Option<Arc<dyn Connection>>) -> Self {
        Self {
            id: id.into(),
            connection,
            raw_bus: Arc::new(Bus::new(BusKind::Raw)),
            parsed_bus: Arc::new(Bus::new(BusKind::Parsed)),
            next_subscription_id: AtomicU64::new(1),
            dispatch_timeout: None,
            running: AtomicBool::new(false),
            events: None,
        }
    }

    /// Bounds how long the subscribers of one bus may take for one frame.
    ///
    /// Subscribers still running at the deadline are dropped and the next
    /// stage proceeds. Without a timeout (the default), dispatch waits for
    /// every subscriber however long it takes.
    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    pub(crate) fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the device's connection, if configured.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        self.connection.as_ref()
    }

    /// Returns the per-bus dispatch timeout, if configured.
    #[must_use]
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout
    }

    /// Returns `true` while [`start`](Self::start) is driving the receive loop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn bus(&self, kind: BusKind) -> &Bus {
        match kind {
            BusKind::Raw => &self.raw_bus,
            BusKind::Parsed => &self.parsed_bus,
        }
    }

    fn require_connection(&self) -> Result<&Arc<dyn Connection>> {
        self.connection.as_ref().ok_or_else(|| {
            DeviceError::NoConnection {
                device_id: self.id.clone(),
            }
            .into()
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Adds a subscriber to a bus.
    ///
    /// Registering the identical subscriber (same `Arc`) on the same bus
    /// again changes nothing and returns the existing ID.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NoConnection`] if the device has no connection.
    pub fn register(&self, bus: BusKind, subscriber: Subscriber) -> Result<SubscriptionId> {
        self.require_connection()?;

        let id = self.bus(bus).insert(subscriber, || {
            SubscriptionId::new(self.next_subscription_id.fetch_add(1, Ordering::Relaxed))
        });
        tracing::debug!(device_id = %self.id, %bus, subscription = %id, "Registered subscriber");
        Ok(id)
    }

    /// Subscribes an async closure to the raw bus.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NoConnection`] if the device has no connection.
    pub fn on_raw_telemetry<F, Fut>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(BusKind::Raw, subscriber(callback))
    }

    /// Subscribes an async closure to the parsed bus.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NoConnection`] if the device has no connection.
    pub fn on_live_telemetry<F, Fut>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(BusKind::Parsed, subscriber(callback))
    }

    /// Removes a subscriber from whichever bus holds it.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.raw_bus.remove(id) || self.parsed_bus.remove(id)
    }

    /// Returns the number of subscribers on a bus.
    #[must_use]
    pub fn subscriber_count(&self, bus: BusKind) -> usize {
        self.bus(bus).len()
    }

    // =========================================================================
    // Receive loop
    // =========================================================================

    /// Connects and delivers telemetry to the subscribers.
    ///
    /// Blocks until the connection ends, either because it was stopped (see
    /// [`stop`](Self::stop)) or because the transport closed and could not
    /// be re-established.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::NoConnection`] if the device has no connection
    /// - [`DeviceError::AlreadyRunning`] if the receive loop is already running
    /// - [`Error::Connection`] if the initial connection fails
    pub async fn start(&self) -> Result<()> {
        let connection = self.require_connection()?;
        let _running = RunningGuard::claim(&self.running).ok_or_else(|| {
            Error::from(DeviceError::AlreadyRunning {
                device_id: self.id.clone(),
            })
        })?;

        let handler = Arc::new(TelemetryDispatcher {
            device_id: self.id.clone(),
            raw_bus: Arc::clone(&self.raw_bus),
            parsed_bus: Arc::clone(&self.parsed_bus),
            dispatch_timeout: self.dispatch_timeout,
        });

        tracing::info!(device_id = %self.id, "Starting live telemetry");
        self.publish(DeviceEvent::telemetry_started(self.id.clone()));

        let result = connection.connect(handler).await;

        match &result {
            Ok(()) => tracing::info!(device_id = %self.id, "Live telemetry stopped"),
            Err(e) => tracing::warn!(device_id = %self.id, error = %e, "Live telemetry failed"),
        }
        self.publish(DeviceEvent::telemetry_stopped(
            self.id.clone(),
            result.as_ref().err().map(ToString::to_string),
        ));

        result.map_err(Error::from)
    }

    /// Stops the receive loop.
    ///
    /// Cooperative: a subscriber already handling a frame runs to
    /// completion, and no further frame is read. Does nothing if the device
    /// has no connection or was never started.
    pub async fn stop(&self) {
        if let Some(connection) = &self.connection {
            tracing::debug!(device_id = %self.id, "Stopping live telemetry");
            connection.stop().await;
        }
    }

    /// Sends a frame to the device.
    ///
    /// Silently dropped when the device has no connection or the connection
    /// is not connected.
    pub async fn send_message(&self, frame: &str) {
        if let Some(connection) = &self.connection {
            connection.send_message(frame).await;
        }
    }

    fn publish(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Frame handler installed on the connection by [`Device::start`].
struct TelemetryDispatcher {
    device_id: DeviceId,
    raw_bus: Arc<Bus>,
    parsed_bus: Arc<Bus>,
    dispatch_timeout: Option<Duration>,
}

impl TelemetryDispatcher {
    fn log_report(&self, bus: BusKind, report: &DispatchReport) {
        if report.failed.is_empty() && report.timed_out == 0 {
            tracing::trace!(
                device_id = %self.device_id,
                %bus,
                subscribers = report.total,
                "Frame delivered"
            );
        } else {
            tracing::warn!(
                device_id = %self.device_id,
                %bus,
                subscribers = report.total,
                failed = report.failed.len(),
                timed_out = report.timed_out,
                "Frame delivery incomplete"
            );
        }
    }
}

#[async_trait]
impl FrameHandler for TelemetryDispatcher {
    async fn handle(&self, frame: Frame) {
        tracing::debug!(device_id = %self.device_id, bytes = frame.len(), "Frame received");

        let report = self.raw_bus.dispatch(&frame, self.dispatch_timeout).await;
        self.log_report(BusKind::Raw, &report);

        // No parsing stage yet: the parsed bus receives the frame unchanged.
        let report = self.parsed_bus.dispatch(&frame, self.dispatch_timeout).await;
        self.log_report(BusKind::Parsed, &report);
    }
}
