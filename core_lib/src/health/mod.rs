pub mod checks;
pub mod clock;
pub mod providers;
pub mod registry;
pub mod schedule;
pub mod service;

#[cfg(test)]
mod tests;

pub use checks::{Body, Check, CheckResult};
pub use clock::{Clock, FixedClock, SystemClock};
pub use providers::{Protocol, Providers, StatusProvider};
pub use registry::parse_checks;
pub use schedule::should_run;
pub use service::ExternalServices;
