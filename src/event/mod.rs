// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device lifecycle events.
//!
//! The [`EventBus`] broadcasts [`DeviceEvent`]s (device added or removed,
//! receive loop started or stopped) to any number of listeners. Telemetry
//! frames themselves never travel over this bus; they go to the
//! subscribers registered on each device.
//!
//! # Examples
//!
//! ```
//! use scadable::DeviceId;
//! use scadable::event::{DeviceEvent, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(DeviceEvent::device_added(DeviceId::from("abc")));
//! ```

mod device_event;
mod event_bus;

pub use device_event::DeviceEvent;
pub use event_bus::EventBus;
