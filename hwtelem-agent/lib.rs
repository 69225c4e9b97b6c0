// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod access;
pub mod capability;
pub mod common;
pub mod config;
pub mod counters;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod prom;
pub mod sink;
pub mod topology;

#[cfg(test)]
mod testing;

pub use access::{RegisterAccess, RegisterAccessExt, ThreadMask};
pub use capability::{CapabilityDescriptor, MicroArchitecture};
pub use config::{AgentConfig, EngineConfig};
pub use error::{HwtelemError, Result};
pub use orchestrator::{SamplingCollector, TelemetryEngine};
pub use prom::PrometheusSink;
pub use sink::{RecordingSink, SensorHandle, SensorKind, TelemetrySink};
pub use topology::{IdentificationRecord, Processor};
