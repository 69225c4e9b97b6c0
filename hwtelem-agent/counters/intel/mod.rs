//! Intel backend, NetBurst through Tiger Lake
//!
//! Every counter group is optional. Which groups are attempted comes from
//! the capability table; whether they survive comes from their probes.

pub mod clock;
pub mod imc;
pub mod pmu;
pub mod rapl;
pub mod thermal;
pub mod uncore;

use crate::access::RegisterAccess;
use crate::capability::{CapabilityDescriptor, IntelFeatures};
use crate::counters::{Pass, Setup};
use crate::sink::TelemetrySink;

use self::clock::ClockMonitor;
use self::imc::ImcMonitor;
use self::pmu::PmuMonitor;
use self::rapl::RaplMonitor;
use self::thermal::ThermalMonitor;
use self::uncore::UncoreMonitor;

#[derive(Debug)]
pub struct IntelBackend {
    thermal: Option<ThermalMonitor>,
    clocks: Option<ClockMonitor>,
    rapl: Option<RaplMonitor>,
    pmu: Option<PmuMonitor>,
    imc: Option<ImcMonitor>,
    uncore: Option<UncoreMonitor>,
}

impl IntelBackend {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        capability: &CapabilityDescriptor,
        features: IntelFeatures,
        setup: &mut Setup<'_, A, S>,
    ) -> Self {
        let first_thread = setup.processor.first_thread().map_or(0, |t| t.id);

        let thermal = ThermalMonitor::initialize(
            capability.ceiling,
            setup.processor,
            setup.access,
            setup.sink,
            setup.factory,
        );
        let clocks = ClockMonitor::initialize(
            features.tsc_multiplier,
            features.ratio_field,
            setup.config.reference_clock_mhz,
            setup.processor,
            setup.access,
            setup.sink,
            setup.factory,
        );
        let rapl = if features.rapl {
            RaplMonitor::initialize(
                capability.energy_unit,
                first_thread,
                setup.access,
                setup.sink,
                setup.factory,
                setup.now,
            )
        } else {
            None
        };
        let pmu = if features.core_pmu {
            PmuMonitor::initialize(
                features.cache_pmcs,
                setup.processor,
                setup.access,
                setup.sink,
                setup.factory,
            )
        } else {
            None
        };
        let imc = if features.client_imc {
            ImcMonitor::initialize(setup.access, setup.sink, setup.factory)
        } else {
            None
        };
        let uncore = features.cbox.and_then(|layout| {
            UncoreMonitor::initialize(layout, first_thread, setup.access, setup.sink, setup.factory)
        });

        tracing::info!(
            "Intel {} backend: thermal={} clocks={} rapl={} pmu={} imc={} uncore={}",
            capability.arch.name(),
            thermal.is_some(),
            clocks.is_some(),
            rapl.is_some(),
            pmu.as_ref().map_or(0, PmuMonitor::thread_count),
            imc.is_some(),
            uncore.as_ref().map_or(0, UncoreMonitor::bank_count),
        );

        Self {
            thermal,
            clocks,
            rapl,
            pmu,
            imc,
            uncore,
        }
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, pass: &mut Pass<'_, A, S>) {
        if let Some(thermal) = &self.thermal {
            thermal.sample(pass.access, pass.sink);
        }
        if let Some(clocks) = &mut self.clocks {
            clocks.sample(pass.access, pass.sink);
        }
        if let Some(rapl) = &mut self.rapl {
            rapl.sample(pass.access, pass.sink, pass.now);
        }
        if let Some(pmu) = &mut self.pmu {
            pmu.sample(pass.access, pass.sink, pass.tick);
        }
        if let Some(imc) = &mut self.imc {
            imc.sample(pass.access, pass.sink, pass.tick);
        }
        if let Some(uncore) = &mut self.uncore {
            uncore.sample(pass.access, pass.sink, pass.tick);
        }
    }
}
