//! Application services: the content pipeline and its collaborators.

pub mod blacklist;
pub mod counters;
pub mod edge;
pub mod error;
pub mod geo;
pub mod repos;
pub mod stats;
