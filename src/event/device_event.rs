// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use crate::device::DeviceId;

/// Lifecycle events emitted by the device manager and its devices.
///
/// # Examples
///
/// ```
/// use scadable::DeviceId;
/// use scadable::event::DeviceEvent;
///
/// let device_id = DeviceId::from("abc");
///
/// let added = DeviceEvent::DeviceAdded { device_id: device_id.clone() };
/// let stopped = DeviceEvent::TelemetryStopped {
///     device_id,
///     error: Some("connection refused".to_string()),
/// };
/// assert!(added.is_lifecycle());
/// assert!(stopped.is_telemetry());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device was added to the manager.
    DeviceAdded {
        /// The ID of the added device.
        device_id: DeviceId,
    },

    /// A device was removed from the manager.
    DeviceRemoved {
        /// The ID of the removed device.
        device_id: DeviceId,
    },

    /// A device's receive loop started.
    TelemetryStarted {
        /// The ID of the device.
        device_id: DeviceId,
    },

    /// A device's receive loop ended.
    TelemetryStopped {
        /// The ID of the device.
        device_id: DeviceId,
        /// Error message if the loop ended because the connection failed.
        error: Option<String>,
    },
}

impl DeviceEvent {
    /// Returns the device ID associated with this event.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::DeviceAdded { device_id }
            | Self::DeviceRemoved { device_id }
            | Self::TelemetryStarted { device_id }
            | Self::TelemetryStopped { device_id, .. } => device_id,
        }
    }

    /// Returns `true` if this is a device lifecycle event (added/removed).
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::DeviceAdded { .. } | Self::DeviceRemoved { .. })
    }

    /// Returns `true` if this is a receive-loop event (started/stopped).
    #[must_use]
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            Self::TelemetryStarted { .. } | Self::TelemetryStopped { .. }
        )
    }

    /// Creates a device added event.
    #[must_use]
    pub fn device_added(device_id: DeviceId) -> Self {
        Self::DeviceAdded { device_id }
    }

    /// Creates a device removed event.
    #[must_use]
    pub fn device_removed(device_id: DeviceId) -> Self {
        Self::DeviceRemoved { device_id }
    }

    /// Creates a telemetry started event.
    #[must_use]
    pub fn telemetry_started(device_id: DeviceId) -> Self {
        Self::TelemetryStarted { device_id }
    }

    /// Creates a telemetry stopped event.
    #[must_use]
    pub fn telemetry_stopped(device_id: DeviceId, error: Option<String>) -> Self {
        Self::TelemetryStopped { device_id, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_extraction() {
        let id = DeviceId::from("abc");

        assert_eq!(DeviceEvent::device_added(id.clone()).device_id(), &id);
        assert_eq!(DeviceEvent::device_removed(id.clone()).device_id(), &id);
        assert_eq!(
            DeviceEvent::telemetry_stopped(id.clone(), None).device_id(),
            &id
        );
    }

    #[test]
    fn lifecycle_events() {
        let id = DeviceId::from("abc");

        assert!(DeviceEvent::device_added(id.clone()).is_lifecycle());
        assert!(DeviceEvent::device_removed(id.clone()).is_lifecycle());
        assert!(!DeviceEvent::telemetry_started(id).is_lifecycle());
    }

    #[test]
    fn telemetry_events() {
        let id = DeviceId::from("abc");

        assert!(DeviceEvent::telemetry_started(id.clone()).is_telemetry());
        assert!(DeviceEvent::telemetry_stopped(id.clone(), None).is_telemetry());
        assert!(!DeviceEvent::device_added(id).is_telemetry());
    }
}
