// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scadable - client library for live device telemetry.
//!
//! This library connects to the Scadable telemetry service and fans every
//! received frame out to asynchronous subscribers, one device at a time.
//!
//! # Concepts
//!
//! - **[`Connection`]**: one long-lived link that delivers text frames
//!   (websocket with automatic reconnection, or an in-memory loopback)
//! - **[`ConnectionFactory`]**: builds a connection from an API key and a
//!   device id
//! - **[`Device`]**: owns a connection and two subscriber buses, raw and
//!   parsed, and drives the receive loop
//! - **[`DeviceManager`]**: one device instance per identifier
//! - **[`Facility`]**: an API key bound to a manager and a factory, with
//!   batch helpers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use scadable::Facility;
//! use scadable::connection::WebSocketConnectionFactory;
//!
//! #[tokio::main]
//! async fn main() -> scadable::Result<()> {
//!     let factory = WebSocketConnectionFactory::new("api.scadable.com/live")?;
//!     let facility = Facility::new("my-api-key").with_connection_factory(Arc::new(factory));
//!
//!     let device = facility.create_device("pump-7", true)?;
//!
//!     device.on_raw_telemetry(|frame| async move {
//!         println!("raw frame: {frame}");
//!     })?;
//!     device.on_live_telemetry(|frame| async move {
//!         println!("telemetry: {frame}");
//!     })?;
//!
//!     // Runs until the device is stopped or removed from the manager
//!     device.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Delivery guarantees
//!
//! Frames are delivered in order. For each frame, all raw subscribers run
//! concurrently and are awaited, then all parsed subscribers; only then is
//! the next frame read. A panicking subscriber is logged and the others
//! still receive the frame.

pub mod connection;
mod device;
pub mod error;
pub mod event;
mod facility;
pub mod manager;
pub mod subscription;

pub use connection::{Connection, ConnectionFactory, ConnectionState, Frame, FrameHandler};
pub use device::{Device, DeviceId};
pub use error::{ConnectionError, DeviceError, Error, Result};
pub use facility::Facility;
pub use manager::DeviceManager;
pub use subscription::{BusKind, Subscriber, SubscriptionId, subscriber};
