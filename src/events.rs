// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic per-component event bus (spec §4.11 / component C11).
//!
//! Every app/state container in this crate owns one `EventBus<E>` keyed to
//! its own typed event enum. Publication happens synchronously on the
//! publisher's thread (the master loop, in every case here); subscribers
//! that need to cross into another thread or task are responsible for their
//! own handoff, matching the teacher's `Aggregator` (`crates/mux/src/events.rs`)
//! which fans a single `broadcast::Sender` out to many WS clients.

use tokio::sync::broadcast;

/// Default channel capacity for a component's event bus.
const DEFAULT_CAPACITY: usize = 256;

/// A typed, synchronous-publish event bus for one state container.
///
/// Cloning an `EventBus` clones the underlying sender handle; all clones
/// share the same broadcast channel.
#[derive(Clone)]
pub struct EventBus<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Identical-value suppression is the emitting
    /// setter's responsibility (spec §4.11 guarantee), not the bus's.
    pub fn publish(&self, event: E) {
        // No receivers is a normal, expected state (no subscribers yet).
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain one event from a subscriber, skipping lag gaps.
///
/// Helper for consumers (tests, the SSE bridge collaborator) that want
/// "next event or none yet" without hand-rolling the `Lagged`/`Closed` match
/// at every call site.
pub async fn recv_skip_lagged<E: Clone>(rx: &mut broadcast::Receiver<E>) -> Option<E> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_observed_by_subscriber() {
        let bus: EventBus<u32> = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(7);
        assert_eq!(recv_skip_lagged(&mut rx).await, Some(7));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus: EventBus<u32> = EventBus::new();
        bus.publish(1);
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_sequence() {
        let bus: EventBus<u32> = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(1);
        bus.publish(2);
        assert_eq!(recv_skip_lagged(&mut a).await, Some(1));
        assert_eq!(recv_skip_lagged(&mut a).await, Some(2));
        assert_eq!(recv_skip_lagged(&mut b).await, Some(1));
        assert_eq!(recv_skip_lagged(&mut b).await, Some(2));
    }
}
