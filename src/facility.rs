// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Account-level entry point tying a credential to a device manager.

use std::fmt;
use std::sync::Arc;

use crate::connection::ConnectionFactory;
use crate::device::{Device, DeviceId};
use crate::error::{DeviceError, Error, Result};
use crate::manager::DeviceManager;
use crate::subscription::{BusKind, Subscriber, SubscriptionId};

/// A facility: an API key, the devices it manages, and how to reach them.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use scadable::Facility;
/// use scadable::connection::WebSocketConnectionFactory;
/// use scadable::subscription::subscriber;
///
/// # async fn example() -> scadable::Result<()> {
/// let facility = Facility::new("my-api-key")
///     .with_connection_factory(Arc::new(WebSocketConnectionFactory::new("api.scadable.com/live")?));
///
/// let devices = facility.create_many_devices(["pump-7", "pump-8"], true)?;
/// facility.live_telemetry(
///     &["pump-7", "pump-8"],
///     subscriber(|frame| async move { println!("{frame}") }),
/// )?;
///
/// for device in devices {
///     tokio::spawn(async move { device.start().await });
/// }
/// # Ok(())
/// # }
/// ```
pub struct Facility {
    api_key: String,
    manager: Arc<DeviceManager>,
    factory: Option<Arc<dyn ConnectionFactory>>,
}

impl Facility {
    /// Creates a facility with its own empty device manager and no
    /// connection factory.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            manager: Arc::new(DeviceManager::new()),
            factory: None,
        }
    }

    /// Uses an existing device manager, possibly shared with other facilities.
    #[must_use]
    pub fn with_device_manager(mut self, manager: Arc<DeviceManager>) -> Self {
        self.manager = manager;
        self
    }

    /// Sets the factory used to build device connections.
    #[must_use]
    pub fn with_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Returns the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the device manager.
    #[must_use]
    pub fn device_manager(&self) -> &Arc<DeviceManager> {
        &self.manager
    }

    /// Returns the connection factory, if configured.
    #[must_use]
    pub fn connection_factory(&self) -> Option<&Arc<dyn ConnectionFactory>> {
        self.factory.as_ref()
    }

    /// Returns the device for `device_id`, creating it if absent.
    ///
    /// With `create_connection`, a new device gets a connection built by the
    /// factory from this facility's API key. An existing device is returned
    /// as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConnectionFactory`] if `create_connection` is set
    /// and no factory is configured.
    pub fn create_device(
        &self,
        device_id: impl Into<DeviceId>,
        create_connection: bool,
    ) -> Result<Arc<Device>> {
        let device_id = device_id.into();

        let connection = if create_connection {
            let factory = self.factory.as_ref().ok_or(Error::NoConnectionFactory)?;
            if let Ok(existing) = self.manager.get(device_id.as_str()) {
                return Ok(existing);
            }
            Some(factory.create_connection(&self.api_key, &device_id))
        } else {
            None
        };

        Ok(self.manager.create(device_id, connection))
    }

    /// Creates (or fetches) several devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConnectionFactory`] if `create_connection` is set
    /// and no factory is configured. No device is created in that case.
    pub fn create_many_devices<I>(&self, device_ids: I, create_connection: bool) -> Result<Vec<Arc<Device>>>
    where
        I: IntoIterator,
        I::Item: Into<DeviceId>,
    {
        if create_connection && self.factory.is_none() {
            return Err(Error::NoConnectionFactory);
        }

        device_ids
            .into_iter()
            .map(|id| self.create_device(id, create_connection))
            .collect()
    }

    /// Subscribes one subscriber to the parsed bus of several devices.
    ///
    /// Either every device gets the subscriber or none does. Returns the
    /// subscription IDs in the order of `device_ids`.
    ///
    /// # Errors
    ///
    /// - [`Error::DevicesNotFound`] listing every unknown identifier
    /// - [`DeviceError::NoConnection`] if a listed device has no connection
    pub fn live_telemetry<S: AsRef<str>>(
        &self,
        device_ids: &[S],
        subscriber: Subscriber,
    ) -> Result<Vec<SubscriptionId>> {
        let mut devices = Vec::with_capacity(device_ids.len());
        let mut missing = Vec::new();
        for id in device_ids {
            match self.manager.get(id.as_ref()) {
                Ok(device) => devices.push(device),
                Err(_) => missing.push(DeviceId::new(id)),
            }
        }
        if !missing.is_empty() {
            return Err(Error::DevicesNotFound(missing));
        }
        if let Some(device) = devices.iter().find(|d| d.connection().is_none()) {
            return Err(DeviceError::NoConnection {
                device_id: device.id().clone(),
            }
            .into());
        }

        devices
            .iter()
            .map(|device| device.register(BusKind::Parsed, Arc::clone(&subscriber)))
            .collect()
    }
}

impl fmt::Debug for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facility")
            .field("api_key", &"<redacted>")
            .field("devices", &self.manager.len())
            .field("factory", &self.factory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LoopbackConnectionFactory;
    use crate::subscription::subscriber;

    fn facility_with_loopback() -> (Facility, Arc<LoopbackConnectionFactory>) {
        let factory = Arc::new(LoopbackConnectionFactory::new());
        let facility = Facility::new("key-1").with_connection_factory(factory.clone());
        (facility, factory)
    }

    #[test]
    fn create_device_without_connection() {
        let facility = Facility::new("key-1");

        let device = facility.create_device("abc", false).unwrap();
        assert!(device.connection().is_none());
        assert!(facility.device_manager().contains("abc"));
    }

    #[test]
    fn create_connection_requires_factory() {
        let facility = Facility::new("key-1");

        let err = facility.create_device("abc", true).unwrap_err();
        assert!(matches!(err, Error::NoConnectionFactory));
        assert!(!facility.device_manager().contains("abc"));
    }

    #[test]
    fn create_device_uses_factory_with_api_key() {
        let (facility, factory) = facility_with_loopback();

        let device = facility.create_device("abc", true).unwrap();
        assert!(device.connection().is_some());
        assert_eq!(
            factory.requests(),
            vec![("key-1".to_string(), DeviceId::from("abc"))]
        );
    }

    #[test]
    fn create_device_is_idempotent() {
        let (facility, factory) = facility_with_loopback();

        let first = facility.create_device("abc", true).unwrap();
        let second = facility.create_device("abc", true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // No connection is built for an existing device
        assert_eq!(factory.requests().len(), 1);
    }

    #[test]
    fn create_many_devices_creates_each() {
        let (facility, _) = facility_with_loopback();

        let devices = facility
            .create_many_devices(["a", "b", "a"], true)
            .unwrap();
        assert_eq!(devices.len(), 3);
        assert!(Arc::ptr_eq(&devices[0], &devices[2]));
        assert_eq!(facility.device_manager().len(), 2);
    }

    #[test]
    fn create_many_devices_without_factory_creates_nothing() {
        let facility = Facility::new("key-1");

        let err = facility.create_many_devices(["a", "b"], true).unwrap_err();
        assert!(matches!(err, Error::NoConnectionFactory));
        assert!(facility.device_manager().is_empty());
    }

    #[test]
    fn live_telemetry_registers_on_parsed_bus() {
        let (facility, _) = facility_with_loopback();
        facility.create_many_devices(["a", "b"], true).unwrap();

        let ids = facility
            .live_telemetry(&["a", "b"], subscriber(|_| async {}))
            .unwrap();
        assert_eq!(ids.len(), 2);

        for id in ["a", "b"] {
            let device = facility.device_manager().get(id).unwrap();
            assert_eq!(device.subscriber_count(BusKind::Parsed), 1);
            assert_eq!(device.subscriber_count(BusKind::Raw), 0);
        }
    }

    #[test]
    fn live_telemetry_with_unknown_device_registers_nothing() {
        let (facility, _) = facility_with_loopback();
        facility.create_device("a", true).unwrap();

        let err = facility
            .live_telemetry(&["a", "x", "y"], subscriber(|_| async {}))
            .unwrap_err();
        assert_eq!(err.to_string(), "devices not found: x, y");

        let device = facility.device_manager().get("a").unwrap();
        assert_eq!(device.subscriber_count(BusKind::Parsed), 0);
    }

    #[test]
    fn live_telemetry_rejects_device_without_connection() {
        let (facility, _) = facility_with_loopback();
        facility.create_device("a", true).unwrap();
        facility.create_device("b", false).unwrap();

        let err = facility
            .live_telemetry(&["a", "b"], subscriber(|_| async {}))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Device(DeviceError::NoConnection { ref device_id }) if device_id.as_str() == "b"
        ));
        let device = facility.device_manager().get("a").unwrap();
        assert_eq!(device.subscriber_count(BusKind::Parsed), 0);
    }

    #[test]
    fn shared_device_manager() {
        let manager = Arc::new(DeviceManager::new());
        let facility = Facility::new("key-1").with_device_manager(manager.clone());

        facility.create_device("abc", false).unwrap();
        assert!(manager.contains("abc"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let facility = Facility::new("super-secret");
        let debug = format!("{facility:?}");
        assert!(!debug.contains("super-secret"));
        assert_eq!(facility.api_key(), "super-secret");
    }
}
