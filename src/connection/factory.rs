// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Factories that build connections for a device.

use std::fmt;
use std::sync::Arc;
#[cfg(feature = "websocket")]
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
#[cfg(feature = "websocket")]
use crate::error::ConnectionError;

#[cfg(feature = "websocket")]
use super::{ReconnectionPolicy, WebSocketConnection};
use super::Connection;

/// Builds a [`Connection`] for a device identity and credential.
///
/// Construction is pure: implementations must not perform network I/O or
/// block. The returned connection is only established once
/// [`Connection::connect`] is called.
pub trait ConnectionFactory: Send + Sync + fmt::Debug {
    /// Creates a connection to `device_id`, authenticated by `credential`.
    fn create_connection(&self, credential: &str, device_id: &DeviceId) -> Arc<dyn Connection>;
}

/// Link-type indicator for websocket transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// TLS-secured websocket (`wss`).
    #[default]
    Secure,
    /// Plain websocket (`ws`).
    Insecure,
}

impl LinkType {
    /// Returns the URI scheme for this link type.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Secure => "wss",
            Self::Insecure => "ws",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// A factory that creates [`WebSocketConnection`]s.
///
/// The target URI is
/// `<scheme>://<dest_uri>?token=<credential>&deviceid=<device_id>`, with
/// both query values percent-encoded.
///
/// # Examples
///
/// ```
/// use scadable::connection::{ConnectionFactory, LinkType, WebSocketConnectionFactory};
/// use scadable::DeviceId;
///
/// # fn example() -> Result<(), scadable::error::ConnectionError> {
/// let factory = WebSocketConnectionFactory::builder()
///     .dest_uri("localhost:8765")
///     .link_type(LinkType::Insecure)
///     .build()?;
///
/// assert_eq!(
///     factory.target_uri("apikey", &DeviceId::from("deviceid")),
///     "ws://localhost:8765?token=apikey&deviceid=deviceid"
/// );
///
/// // No I/O happens until `connect` is called on the connection.
/// let _connection = factory.create_connection("apikey", &DeviceId::from("deviceid"));
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "websocket")]
#[derive(Debug, Clone)]
pub struct WebSocketConnectionFactory {
    dest_uri: String,
    link_type: LinkType,
    reconnection: ReconnectionPolicy,
    connect_timeout: Duration,
}

#[cfg(feature = "websocket")]
impl WebSocketConnectionFactory {
    /// Creates a builder for configuring a websocket connection factory.
    #[must_use]
    pub fn builder() -> WebSocketConnectionFactoryBuilder {
        WebSocketConnectionFactoryBuilder::default()
    }

    /// Creates a factory for secure links with default settings.
    ///
    /// # Errors
    ///
    /// Returns error if the destination address is invalid.
    pub fn new(dest_uri: impl Into<String>) -> Result<Self, ConnectionError> {
        Self::builder().dest_uri(dest_uri).build()
    }

    /// Returns the destination address (host, port and path, no scheme).
    #[must_use]
    pub fn dest_uri(&self) -> &str {
        &self.dest_uri
    }

    /// Returns the link type.
    #[must_use]
    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Returns the reconnection policy handed to created connections.
    #[must_use]
    pub fn reconnection(&self) -> &ReconnectionPolicy {
        &self.reconnection
    }

    /// Builds the full target URI for a device.
    #[must_use]
    pub fn target_uri(&self, credential: &str, device_id: &DeviceId) -> String {
        format!(
            "{}://{}?token={}&deviceid={}",
            self.link_type.scheme(),
            self.dest_uri,
            urlencoding::encode(credential),
            urlencoding::encode(device_id.as_str()),
        )
    }
}

#[cfg(feature = "websocket")]
impl ConnectionFactory for WebSocketConnectionFactory {
    fn create_connection(&self, credential: &str, device_id: &DeviceId) -> Arc<dyn Connection> {
        Arc::new(
            WebSocketConnection::new(self.target_uri(credential, device_id))
                .with_reconnection(self.reconnection.clone())
                .with_connect_timeout(self.connect_timeout),
        )
    }
}

/// Builder for [`WebSocketConnectionFactory`].
#[cfg(feature = "websocket")]
#[derive(Debug)]
pub struct WebSocketConnectionFactoryBuilder {
    dest_uri: String,
    link_type: LinkType,
    reconnection: ReconnectionPolicy,
    connect_timeout: Duration,
}

#[cfg(feature = "websocket")]
impl Default for WebSocketConnectionFactoryBuilder {
    fn default() -> Self {
        Self {
            dest_uri: String::new(),
            link_type: LinkType::default(),
            reconnection: ReconnectionPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(feature = "websocket")]
impl WebSocketConnectionFactoryBuilder {
    /// Sets the destination address, e.g. `api.scadable.com/live` or
    /// `localhost:8765`. The scheme comes from the link type.
    #[must_use]
    pub fn dest_uri(mut self, dest_uri: impl Into<String>) -> Self {
        self.dest_uri = dest_uri.into();
        self
    }

    /// Sets the link type (default: [`LinkType::Secure`]).
    #[must_use]
    pub fn link_type(mut self, link_type: LinkType) -> Self {
        self.link_type = link_type;
        self
    }

    /// Sets the reconnection policy of created connections.
    #[must_use]
    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets the timeout of each connection attempt (default: 10 seconds).
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds the factory.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidAddress`] if the destination is
    /// empty, carries its own scheme, or carries a query string.
    pub fn build(self) -> Result<WebSocketConnectionFactory, ConnectionError> {
        let dest_uri = self.dest_uri.trim();
        if dest_uri.is_empty() {
            return Err(ConnectionError::InvalidAddress(
                "destination address is required".to_string(),
            ));
        }
        if dest_uri.contains("://") {
            return Err(ConnectionError::InvalidAddress(format!(
                "destination must not include a scheme: {dest_uri}"
            )));
        }
        if dest_uri.contains('?') {
            return Err(ConnectionError::InvalidAddress(format!(
                "destination must not include a query string: {dest_uri}"
            )));
        }

        Ok(WebSocketConnectionFactory {
            dest_uri: dest_uri.to_string(),
            link_type: self.link_type,
            reconnection: self.reconnection,
            connect_timeout: self.connect_timeout,
        })
    }
}
