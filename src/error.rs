// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `scadable` library.
//!
//! Configuration mistakes (a device without a connection, an unknown device
//! id, a missing connection factory) surface as errors on the call that made
//! them. Transport disconnects are part of the normal connection lifecycle
//! and never appear here; only a failed initial connect does.

use thiserror::Error;

use crate::device::DeviceId;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by a connection.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Error raised by a device operation.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Device was not found in the manager.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// One or more devices of a batch operation were not found.
    #[error("devices not found: {}", join_ids(.0))]
    DevicesNotFound(Vec<DeviceId>),

    /// A connection was requested but no connection factory is configured.
    #[error("no connection factory configured")]
    NoConnectionFactory,
}

impl Error {
    /// Returns `true` for caller mistakes that will fail the same way on retry.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Connection(e) => matches!(e, ConnectionError::InvalidAddress(_)),
            Self::Device(_)
            | Self::DeviceNotFound(_)
            | Self::DevicesNotFound(_)
            | Self::NoConnectionFactory => true,
        }
    }
}

fn join_ids(ids: &[DeviceId]) -> String {
    ids.iter()
        .map(DeviceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while establishing or driving a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The initial connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The initial connection attempt timed out.
    #[error("connection timed out after {0} ms")]
    Timeout(u64),

    /// Invalid destination address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The connection is already driving a receive loop.
    #[error("connection is already active")]
    AlreadyConnected,
}

/// Errors related to device operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device was created without a connection.
    #[error("no connection configured for device {device_id}")]
    NoConnection {
        /// The device lacking a connection.
        device_id: DeviceId,
    },

    /// The device's receive loop is already running.
    #[error("live telemetry is already running for device {device_id}")]
    AlreadyRunning {
        /// The device that is already running.
        device_id: DeviceId,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
