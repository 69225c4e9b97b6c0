//! Fallback backend for processors missing from the capability table

use hwtelem_raw::arch::intel::clock::RatioField;

use crate::access::RegisterAccess;
use crate::capability::{ThermalCeiling, TscMultiplierSource, DEFAULT_CEILING};
use crate::counters::intel::clock::ClockMonitor;
use crate::counters::intel::thermal::ThermalMonitor;
use crate::counters::{Pass, Setup};
use crate::sink::TelemetrySink;
use crate::topology::Vendor;

/// Per-core clocks at the reference clock, plus the digital thermal sensor
/// on Intel parts with a fixed ceiling
#[derive(Debug)]
pub struct GenericBackend {
    clocks: Option<ClockMonitor>,
    thermal: Option<ThermalMonitor>,
}

impl GenericBackend {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(setup: &mut Setup<'_, A, S>) -> Self {
        let clocks = ClockMonitor::initialize(
            TscMultiplierSource::None,
            RatioField::SecondByte,
            setup.config.reference_clock_mhz,
            setup.processor,
            setup.access,
            setup.sink,
            setup.factory,
        );
        let thermal = match setup.processor.identity().vendor {
            Vendor::Intel => ThermalMonitor::initialize(
                ThermalCeiling::Fixed(DEFAULT_CEILING),
                setup.processor,
                setup.access,
                setup.sink,
                setup.factory,
            ),
            _ => None,
        };

        tracing::info!(
            "Generic backend for {:?} processor",
            setup.processor.identity().vendor
        );

        Self { clocks, thermal }
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, pass: &mut Pass<'_, A, S>) {
        if let Some(clocks) = &mut self.clocks {
            clocks.sample(pass.access, pass.sink);
        }
        if let Some(thermal) = &self.thermal {
            thermal.sample(pass.access, pass.sink);
        }
    }
}
