pub mod collector;
pub mod engine;

pub use collector::SamplingCollector;
pub use engine::TelemetryEngine;
