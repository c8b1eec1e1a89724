// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager holding one device per identifier.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::connection::Connection;
use crate::device::{Device, DeviceId};
use crate::error::{Error, Result};
use crate::event::{DeviceEvent, EventBus};

/// Registry of [`Device`]s.
///
/// The manager owns each device until it is removed; callers get shared
/// `Arc<Device>` handles.
#[derive(Debug)]
pub struct DeviceManager {
    /// Managed devices, keyed by device ID.
    devices: RwLock<HashMap<DeviceId, Arc<Device>>>,
    /// Event bus for broadcasting device events.
    event_bus: EventBus,
    /// Dispatch timeout applied to devices created by this manager.
    dispatch_timeout: Option<Duration>,
}

impl DeviceManager {
    /// Creates an empty device manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            event_bus: EventBus::new(),
            dispatch_timeout: None,
        }
    }

    /// Creates an empty device manager with custom event bus capacity.
    ///
    /// # Panics
    ///
    /// Panics if `event_capacity` is zero.
    #[must_use]
    pub fn with_capacity(event_capacity: usize) -> Self {
        Self {
            event_bus: EventBus::with_capacity(event_capacity),
            ..Self::new()
        }
    }

    /// Sets the dispatch timeout for devices created from now on.
    ///
    /// See [`Device::with_dispatch_timeout`].
    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Subscribes to device events.
    ///
    /// The receiver gets lifecycle events for every managed device, and the
    /// start and end of their receive loops.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_bus.subscribe()
    }

    /// Returns the number of active event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.event_bus.subscriber_count()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Returns the device for `device_id`, creating it if absent.
    ///
    /// When the device already exists, `connection` is dropped and the
    /// existing instance is returned unchanged.
    pub fn create(
        &self,
        device_id: impl Into<DeviceId>,
        connection: Option<Arc<dyn Connection>>,
    ) -> Arc<Device> {
        let device_id = device_id.into();

        let device = match self.devices.write().entry(device_id.clone()) {
            Entry::Occupied(entry) => {
                tracing::trace!(%device_id, "Device already exists");
                return Arc::clone(entry.get());
            }
            Entry::Vacant(entry) => {
                let mut device = Device::new(device_id.clone(), connection)
                    .with_events(self.event_bus.clone());
                if let Some(timeout) = self.dispatch_timeout {
                    device = device.with_dispatch_timeout(timeout);
                }
                Arc::clone(entry.insert(Arc::new(device)))
            }
        };

        tracing::debug!(%device_id, has_connection = device.connection().is_some(), "Device created");
        self.event_bus.publish(DeviceEvent::device_added(device_id));
        device
    }

    /// Returns the device for `device_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if no such device exists.
    pub fn get(&self, device_id: &str) -> Result<Arc<Device>> {
        self.devices
            .read()
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(DeviceId::from(device_id)))
    }

    /// Returns `true` if a device with this identifier exists.
    #[must_use]
    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.read().contains_key(device_id)
    }

    /// Returns the number of managed devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if no devices are managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Returns the identifiers of all managed devices, sorted.
    #[must_use]
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Removes a device and stops its receive loop.
    ///
    /// The stop is cooperative: a subscriber handling a frame finishes first,
    /// and [`Device::start`] returns afterwards in whichever task awaits it.
    /// Returns the removed device, or `None` if it did not exist.
    pub async fn remove(&self, device_id: &str) -> Option<Arc<Device>> {
        let device = self.devices.write().remove(device_id)?;

        tracing::debug!(device_id = %device.id(), "Device removed");
        self.event_bus
            .publish(DeviceEvent::device_removed(device.id().clone()));
        device.stop().await;

        Some(device)
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, LoopbackConnection};

    #[test]
    fn new_manager_is_empty() {
        let manager = DeviceManager::new();
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
        assert!(manager.device_ids().is_empty());
    }

    #[test]
    fn create_is_idempotent() {
        let manager = DeviceManager::new();

        let first = manager.create("abc", None);
        assert!(manager.contains("abc"));
        assert_eq!(manager.len(), 1);

        let second = manager.create("abc", Some(Arc::new(LoopbackConnection::new())));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.len(), 1);
        // The second connection was discarded
        assert!(second.connection().is_none());
    }

    #[test]
    fn get_returns_same_instance() {
        let manager = DeviceManager::new();
        let created = manager.create("abc", None);

        let found = manager.get("abc").unwrap();
        assert!(Arc::ptr_eq(&created, &found));
    }

    #[test]
    fn get_unknown_device_fails() {
        let manager = DeviceManager::new();

        let err = manager.get("missing").unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(ref id) if id.as_str() == "missing"));
        assert!(err.is_configuration());
    }

    #[test]
    fn device_ids_are_sorted() {
        let manager = DeviceManager::new();
        manager.create("b", None);
        manager.create("a", None);
        manager.create("c", None);

        let ids: Vec<String> = manager
            .device_ids()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn remove_then_create_yields_new_instance() {
        let manager = DeviceManager::new();
        let first = manager.create("abc", None);

        let removed = manager.remove("abc").await.unwrap();
        assert!(Arc::ptr_eq(&first, &removed));
        assert!(!manager.contains("abc"));
        assert!(manager.is_empty());

        let second = manager.create("abc", None);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn remove_unknown_device_returns_none() {
        let manager = DeviceManager::new();
        assert!(manager.remove("missing").await.is_none());
    }

    #[tokio::test]
    async fn create_and_remove_publish_events() {
        let manager = DeviceManager::new();
        let mut rx = manager.subscribe();
        assert_eq!(manager.subscriber_count(), 1);

        manager.create("abc", None);
        manager.create("abc", None);
        manager.remove("abc").await;

        let id = DeviceId::from("abc");
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::device_added(id.clone()));
        // The second create found the existing device and published nothing
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::device_removed(id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_stops_running_device() {
        let manager = DeviceManager::new();
        let mut rx = manager.subscribe();
        let connection = Arc::new(LoopbackConnection::new());
        let device = manager.create("abc", Some(connection.clone() as Arc<dyn Connection>));

        let task = tokio::spawn({
            let device = device.clone();
            async move { device.start().await }
        });
        let mut state = connection.watch_state();
        state.wait_for(ConnectionState::is_connected).await.unwrap();

        manager.remove("abc").await;
        task.await.unwrap().unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);

        let id = DeviceId::from("abc");
        let events: Vec<DeviceEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                DeviceEvent::device_added(id.clone()),
                DeviceEvent::telemetry_started(id.clone()),
                DeviceEvent::device_removed(id.clone()),
                DeviceEvent::telemetry_stopped(id, None),
            ]
        );
    }

    #[test]
    fn dispatch_timeout_applies_to_created_devices() {
        let manager = DeviceManager::new().with_dispatch_timeout(Duration::from_millis(250));
        let device = manager.create("abc", None);
        assert_eq!(device.dispatch_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn with_capacity_creates_empty_manager() {
        let manager = DeviceManager::with_capacity(16);
        assert!(manager.is_empty());
        assert_eq!(manager.subscriber_count(), 0);
    }
}
