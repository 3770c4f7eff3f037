//! Caching of check results between cycles

pub mod responses;

pub use responses::{CacheStats, ResponseCache};
