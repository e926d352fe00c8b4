//! Edge payload cache.
//!
//! Origin responses are cached per [`CacheKey`] and served while younger than
//! the caller's `maxAge`. Concurrent misses for the same key share a single
//! origin fetch.

mod config;
mod flight;
mod keys;
mod lock;
mod manager;
mod origin;
mod store;

pub use config::CacheConfig;
pub use flight::{FlightOutcome, FlightTicket, InFlightFetches};
pub use keys::CacheKey;
pub use manager::{CacheManager, RetrievalSource, Retrieved};
pub use origin::{OriginFetcher, OriginResponse};
pub use store::{PayloadStore, StorageDelta};
