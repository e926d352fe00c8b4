//! yacdn edge node: a fetch-through cache with single-flight origin fetches,
//! geo-proximity node selection and fleet-wide usage statistics.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
