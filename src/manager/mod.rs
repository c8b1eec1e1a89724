// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of devices keyed by identifier.
//!
//! The [`DeviceManager`] holds at most one [`Device`](crate::Device) per
//! identifier. [`DeviceManager::create`] is get-or-create, so every caller
//! asking for the same identifier shares the same instance and its
//! subscribers.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use scadable::connection::LoopbackConnection;
//! use scadable::event::DeviceEvent;
//! use scadable::manager::DeviceManager;
//!
//! # async fn example() -> scadable::Result<()> {
//! let manager = DeviceManager::new();
//!
//! let mut events = manager.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let DeviceEvent::TelemetryStopped { device_id, error: Some(e) } = event {
//!             eprintln!("{device_id}: {e}");
//!         }
//!     }
//! });
//!
//! let device = manager.create("pump-7", Some(Arc::new(LoopbackConnection::new())));
//! assert!(Arc::ptr_eq(&device, &manager.get("pump-7")?));
//!
//! // Stops the receive loop, if one is running
//! manager.remove("pump-7").await;
//! # Ok(())
//! # }
//! ```

mod device_manager;

pub use device_manager::DeviceManager;
