//! Single-flight registry for origin fetches.
//!
//! The first caller for a key becomes the leader and owns the fetch; callers
//! arriving while it runs subscribe to the same outcome. The registry entry is
//! removed before the outcome is broadcast, so a subscriber can never miss it.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::broadcast;

use crate::domain::{entities::CachedResource, error::OriginError};

pub type FlightOutcome = Result<Arc<CachedResource>, OriginError>;

#[derive(Default, Clone)]
pub struct InFlightFetches {
    inner: Arc<DashMap<String, broadcast::Sender<FlightOutcome>>>,
}

pub enum FlightTicket {
    Leader(FlightLeader, FlightWaiter),
    Follower(FlightWaiter),
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, starting one if none is running.
    pub fn join(&self, key: &str) -> FlightTicket {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(occupied) => FlightTicket::Follower(FlightWaiter {
                key: key.to_string(),
                receiver: occupied.get().subscribe(),
            }),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = broadcast::channel(1);
                vacant.insert(sender.clone());
                FlightTicket::Leader(
                    FlightLeader {
                        key: key.to_string(),
                        sender,
                        flights: Arc::clone(&self.inner),
                        completed: false,
                    },
                    FlightWaiter {
                        key: key.to_string(),
                        receiver,
                    },
                )
            }
        }
    }

    /// Number of fetches currently running.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Owner of one running fetch.
///
/// Dropping it without calling [`FlightLeader::complete`] (for example when
/// the fetch task panics) unregisters the flight and wakes every waiter with
/// [`OriginError::Abandoned`].
pub struct FlightLeader {
    key: String,
    sender: broadcast::Sender<FlightOutcome>,
    flights: Arc<DashMap<String, broadcast::Sender<FlightOutcome>>>,
    completed: bool,
}

impl FlightLeader {
    pub fn complete(mut self, outcome: FlightOutcome) {
        self.flights.remove(&self.key);
        self.completed = true;
        let _ = self.sender.send(outcome);
    }
}

impl Drop for FlightLeader {
    fn drop(&mut self) {
        if !self.completed {
            self.flights.remove(&self.key);
        }
    }
}

pub struct FlightWaiter {
    key: String,
    receiver: broadcast::Receiver<FlightOutcome>,
}

impl FlightWaiter {
    pub async fn wait(mut self) -> FlightOutcome {
        match self.receiver.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(OriginError::abandoned(self.key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;

    fn resource() -> Arc<CachedResource> {
        Arc::new(CachedResource {
            url: "https://example.com/x?".to_string(),
            content_type: "text/plain".to_string(),
            data: Bytes::from_static(b"x"),
            fetched_at: Instant::now(),
            fetch_duration: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn followers_receive_the_leaders_outcome() {
        let flights = InFlightFetches::new();
        let FlightTicket::Leader(leader, leader_wait) = flights.join("k") else {
            panic!("first caller should lead");
        };
        let FlightTicket::Follower(follower_wait) = flights.join("k") else {
            panic!("second caller should follow");
        };
        assert_eq!(flights.len(), 1);

        leader.complete(Ok(resource()));
        assert!(flights.is_empty());

        let a = leader_wait.wait().await.expect("leader outcome");
        let b = follower_wait.wait().await.expect("follower outcome");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn completed_flight_lets_the_next_caller_lead() {
        let flights = InFlightFetches::new();
        let FlightTicket::Leader(leader, _wait) = flights.join("k") else {
            panic!("first caller should lead");
        };
        leader.complete(Err(OriginError::Status {
            url: "k".to_string(),
            status: 500,
        }));

        assert!(matches!(flights.join("k"), FlightTicket::Leader(..)));
    }

    #[tokio::test]
    async fn dropped_leader_wakes_waiters_with_abandoned() {
        let flights = InFlightFetches::new();
        let FlightTicket::Leader(leader, leader_wait) = flights.join("k") else {
            panic!("first caller should lead");
        };
        let FlightTicket::Follower(follower_wait) = flights.join("k") else {
            panic!("second caller should follow");
        };

        drop(leader);
        assert!(flights.is_empty());
        assert_eq!(
            follower_wait.wait().await.expect_err("abandoned"),
            OriginError::abandoned("k")
        );
        assert!(leader_wait.wait().await.is_err());
    }
}
