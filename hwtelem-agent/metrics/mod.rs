pub mod decode;
pub mod delta;
pub mod perf;
pub mod ratio;

pub use delta::{counter_delta, CounterTrack, EnergyInterval, EnergyTracker, IntervalClock, Tick};
pub use perf::{PerfContext, ThreadPerformanceData};
