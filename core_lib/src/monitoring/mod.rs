pub mod system;

pub use system::{HostMetrics, LoadAverage, ResourceSampler, SystemSampler, Volume, VolumeUsage};
