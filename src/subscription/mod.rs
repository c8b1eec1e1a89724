// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription system for live telemetry.
//!
//! Every device owns two buses of asynchronous subscribers:
//!
//! - [`BusKind::Raw`] receives every frame verbatim
//! - [`BusKind::Parsed`] receives the output of the parsing stage once the
//!   raw bus is done with the frame
//!
//! For each frame, all subscribers of a bus run concurrently and the device
//! waits for every one of them before moving on, so frames are never
//! overtaken. A panicking subscriber is logged and does not disturb the
//! others.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use scadable::connection::LoopbackConnection;
//! use scadable::subscription::{BusKind, subscriber};
//! use scadable::Device;
//!
//! # fn example() -> scadable::Result<()> {
//! let device = Device::new("abc", Some(Arc::new(LoopbackConnection::new())));
//!
//! // Convenience registration with an async closure
//! let sub_id = device.on_live_telemetry(|frame| async move {
//!     println!("telemetry: {frame}");
//! })?;
//!
//! // Explicit registration of a reusable subscriber
//! let audit = subscriber(|frame| async move { println!("audit: {frame}") });
//! device.register(BusKind::Raw, audit.clone())?;
//! device.register(BusKind::Raw, audit)?; // same subscriber: no-op
//!
//! device.unsubscribe(sub_id);
//! # Ok(())
//! # }
//! ```

mod bus;
mod subscriber;

pub(crate) use bus::{Bus, DispatchReport};
pub use bus::BusKind;
pub use subscriber::{Subscriber, SubscriptionId, subscriber};
