use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

/// Progress of one in-flight lookup as seen by the callers waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FlightStatus<V> {
    Pending,
    Settled(V),
    /// The leader went away without recording an outcome.
    Abandoned,
}

pub(crate) struct FlightState<V> {
    status: watch::Sender<FlightStatus<V>>,
}

impl<V: Clone> FlightState<V> {
    fn new() -> Self {
        let (status, _) = watch::channel(FlightStatus::Pending);
        Self { status }
    }

    fn waiter(&self) -> FlightWaiter<V> {
        FlightWaiter {
            status: self.status.subscribe(),
        }
    }

    /// Publish the final outcome. `None` marks the flight abandoned.
    pub(crate) fn settle(&self, outcome: Option<V>) {
        let status = match outcome {
            Some(value) => FlightStatus::Settled(value),
            None => FlightStatus::Abandoned,
        };
        self.status.send_replace(status);
    }
}

/// Pending-handle store keyed by candidate value.
///
/// Holds no lock of its own; the owner serializes access so that checking
/// for a flight and reserving one happen in the same critical section.
pub(crate) struct Flights<V> {
    map: HashMap<String, Arc<FlightState<V>>>,
}

impl<V> Default for Flights<V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<V: Clone> Flights<V> {
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Reserve `key`. Returns `false` when a flight already exists.
    pub(crate) fn reserve(&mut self, key: &str) -> bool {
        if self.map.contains_key(key) {
            return false;
        }
        self.map
            .insert(key.to_string(), Arc::new(FlightState::new()));
        true
    }

    /// Subscribe to an existing flight. Subscribing happens while the owner
    /// holds its lock, so a settle that follows can never be missed.
    pub(crate) fn join(&self, key: &str) -> Option<FlightWaiter<V>> {
        self.map.get(key).map(|state| state.waiter())
    }

    /// Remove the flight for `key`, handing it back so the caller can settle
    /// it once the reservation is gone.
    pub(crate) fn release(&mut self, key: &str) -> Option<Arc<FlightState<V>>> {
        self.map.remove(key)
    }
}

pub struct FlightWaiter<V> {
    status: watch::Receiver<FlightStatus<V>>,
}

impl<V: Clone> FlightWaiter<V> {
    /// Wait for the leader. `None` means the leader was dropped before it
    /// recorded an outcome and the caller should start over.
    pub async fn wait(mut self) -> Option<V> {
        let status = self
            .status
            .wait_for(|status| !matches!(status, FlightStatus::Pending))
            .await;
        match status {
            Ok(status) => match &*status {
                FlightStatus::Settled(value) => Some(value.clone()),
                _ => None,
            },
            Err(_) => None,
        }
    }
}
