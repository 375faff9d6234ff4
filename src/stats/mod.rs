//! Statistics exposed to monitoring consumers

pub mod metrics;

pub use metrics::{ConnectionStats, InputStats, RateSample};
