// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscriber buses and concurrent frame fan-out.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::connection::Frame;

use super::{Subscriber, SubscriptionId};

/// The named subscriber buses of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Receives every frame verbatim.
    Raw,
    /// Receives the output of the parsing stage, after the raw bus.
    ///
    /// Frames are currently passed through unparsed.
    Parsed,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Parsed => f.write_str("parsed"),
        }
    }
}

/// Outcome of dispatching one frame to a bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    /// Subscribers in the snapshot the frame was dispatched to.
    pub total: usize,
    /// Subscribers that ran to completion.
    pub completed: usize,
    /// Subscribers that panicked.
    pub failed: Vec<SubscriptionId>,
    /// Subscribers abandoned when the dispatch timeout expired.
    pub timed_out: usize,
}

/// A set of subscribers, in registration order.
pub(crate) struct Bus {
    kind: BusKind,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl Bus {
    pub(crate) fn new(kind: BusKind) -> Self {
        Self {
            kind,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Adds a subscriber unless the identical one is already present.
    ///
    /// Returns the subscriber's ID, existing or new.
    pub(crate) fn insert(
        &self,
        subscriber: Subscriber,
        next_id: impl FnOnce() -> SubscriptionId,
    ) -> SubscriptionId {
        let mut subscribers = self.subscribers.write();
        if let Some((id, _)) = subscribers
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &subscriber))
        {
            return *id;
        }

        let id = next_id();
        subscribers.push((id, subscriber));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Dispatches `frame` to every subscriber concurrently and waits for all
    /// of them.
    ///
    /// Works on a snapshot, so subscribers registered mid-dispatch see the
    /// next frame. A panicking subscriber is logged and does not affect the
    /// others. With a `timeout`, subscribers still running at the deadline
    /// are dropped.
    pub(crate) async fn dispatch(&self, frame: &Frame, timeout: Option<Duration>) -> DispatchReport {
        let snapshot = self.subscribers.read().clone();
        let mut report = DispatchReport {
            total: snapshot.len(),
            ..DispatchReport::default()
        };
        if snapshot.is_empty() {
            return report;
        }

        let mut pending: FuturesUnordered<_> = snapshot
            .into_iter()
            .map(|(id, subscriber)| {
                let frame = frame.clone();
                async move {
                    let outcome = AssertUnwindSafe(async move { subscriber(frame).await })
                        .catch_unwind()
                        .await;
                    (id, outcome)
                }
            })
            .collect();

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let next = match deadline {
                Some(deadline) => {
                    if let Ok(next) = tokio::time::timeout_at(deadline, pending.next()).await {
                        next
                    } else {
                        report.timed_out = pending.len();
                        tracing::warn!(
                            bus = %self.kind,
                            abandoned = report.timed_out,
                            "Dispatch timed out, abandoning subscribers"
                        );
                        break;
                    }
                }
                None => pending.next().await,
            };

            let Some((id, outcome)) = next else {
                break;
            };
            match outcome {
                Ok(()) => report.completed += 1,
                Err(panic) => {
                    tracing::error!(
                        bus = %self.kind,
                        subscription = %id,
                        panic = panic_message(panic.as_ref()),
                        "Subscriber panicked"
                    );
                    report.failed.push(id);
                }
            }
        }

        report
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("kind", &self.kind)
            .field("subscriber_count", &self.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
