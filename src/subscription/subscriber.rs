// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscriber callbacks and subscription identifiers.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::connection::Frame;

/// Unique identifier for a subscription.
///
/// Returned when registering a subscriber and used to unsubscribe later.
/// IDs are unique within a device's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a new subscription ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// An asynchronous telemetry callback.
///
/// Receives one frame per invocation. Identity is the `Arc` allocation:
/// registering a clone of the same `Subscriber` twice on a bus is a no-op.
pub type Subscriber = Arc<dyn Fn(Frame) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`Subscriber`].
///
/// # Examples
///
/// ```
/// use scadable::subscription::subscriber;
///
/// let log = subscriber(|frame| async move {
///     println!("telemetry: {frame}");
/// });
/// ```
pub fn subscriber<F, Fut>(callback: F) -> Subscriber
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |frame| callback(frame).boxed())
}
