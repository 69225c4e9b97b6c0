//! Vendor backends: counter programming at construction and per-tick sampling
//!
//! Sampling never fails as a whole. A failed register read leaves the
//! dependent sensor at its previous value and is logged at `debug`; a failed
//! capability probe disables its feature for the lifetime of the backend and
//! is logged at `warn`.

pub mod amd;
pub mod generic;
pub mod intel;

use std::fmt::Display;
use std::time::Instant;

use crate::access::RegisterAccess;
use crate::capability::{CapabilityDescriptor, VendorFeatures};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::metrics::Tick;
use crate::sink::{SensorFactory, TelemetrySink};
use crate::topology::Processor;

pub use amd::AmdBackend;
pub use generic::GenericBackend;
pub use intel::IntelBackend;

/// Counts are published in units of 10^9
pub(crate) const GIGA: f64 = 1e9;

/// Bytes transferred per cache line
pub(crate) const CACHE_LINE_BYTES: u64 = 64;

pub(crate) trait LogOnError<T> {
    /// Sampling-path failure: log at debug and carry on
    fn or_debug(self, what: impl Display) -> Option<T>;

    /// Probe or programming failure: log at warn and carry on
    fn or_warn(self, what: impl Display) -> Option<T>;
}

impl<T> LogOnError<T> for Result<T> {
    fn or_debug(self, what: impl Display) -> Option<T> {
        self.map_err(|e| tracing::debug!("{what}: {e}")).ok()
    }

    fn or_warn(self, what: impl Display) -> Option<T> {
        self.map_err(|e| tracing::warn!("{what}: {e}")).ok()
    }
}

pub(crate) fn core_name(index: usize) -> String {
    format!("CPU Core #{}", index + 1)
}

/// Everything a backend needs while it programs counters and creates sensors
pub struct Setup<'a, A: RegisterAccess, S: TelemetrySink> {
    pub processor: &'a Processor,
    pub config: &'a EngineConfig,
    pub access: &'a A,
    pub sink: &'a mut S,
    pub factory: &'a mut SensorFactory,
    pub now: Instant,
}

/// Everything a backend needs for one sampling pass
pub struct Pass<'a, A: RegisterAccess, S: TelemetrySink> {
    pub processor: &'a Processor,
    pub access: &'a A,
    pub sink: &'a mut S,
    pub factory: &'a mut SensorFactory,
    pub tick: Tick,
    pub now: Instant,
}

#[derive(Debug)]
pub enum Backend {
    Amd(AmdBackend),
    Intel(IntelBackend),
    Generic(GenericBackend),
}

impl Backend {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        capability: &CapabilityDescriptor,
        setup: &mut Setup<'_, A, S>,
    ) -> Self {
        match capability.features {
            VendorFeatures::Amd(features) => {
                Backend::Amd(AmdBackend::initialize(capability, features, setup))
            }
            VendorFeatures::Intel(features) => {
                Backend::Intel(IntelBackend::initialize(capability, features, setup))
            }
            VendorFeatures::Unknown => Backend::Generic(GenericBackend::initialize(setup)),
        }
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, pass: &mut Pass<'_, A, S>) {
        match self {
            Backend::Amd(backend) => backend.sample(pass),
            Backend::Intel(backend) => backend.sample(pass),
            Backend::Generic(backend) => backend.sample(pass),
        }
    }
}
