//! Family 17h backend

pub mod core;
pub mod l3;
pub mod smu;

use hwtelem_raw::arch::amd::power::ENERGY_UNIT_JOULES;

use crate::access::RegisterAccess;
use crate::capability::{AmdFeatures, CapabilityDescriptor};
use crate::counters::{LogOnError, Pass, Setup};
use crate::metrics::PerfContext;
use crate::sink::TelemetrySink;

use self::core::{CoreMonitor, ThreadSensors, TotalSensors};
use self::l3::L3Monitor;
use self::smu::PackageMonitor;

#[derive(Debug)]
pub struct AmdBackend {
    energy_unit: f64,
    package: PackageMonitor,
    cores: Vec<CoreMonitor>,
    threads: PerfContext<ThreadSensors>,
    totals: Option<TotalSensors>,
    l3: L3Monitor,
}

impl AmdBackend {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        capability: &CapabilityDescriptor,
        features: AmdFeatures,
        setup: &mut Setup<'_, A, S>,
    ) -> Self {
        let energy_unit = capability.energy_unit.joules(None).unwrap_or(ENERGY_UNIT_JOULES);
        let first_thread = setup.processor.first_thread().map_or(0, |t| t.id);
        let package = PackageMonitor::new(first_thread, features, energy_unit, setup.sink, setup.factory);

        let mut cores = Vec::with_capacity(setup.processor.core_count());
        for core in setup.processor.cores() {
            let counted: Vec<u32> = core
                .threads
                .iter()
                .map(|t| t.id)
                .filter(|&thread| {
                    self::core::program_thread(setup.access, thread)
                        .or_warn(format_args!("core counters on thread {thread}"))
                        .is_some()
                })
                .collect();
            cores.push(CoreMonitor::new(core, counted, setup.factory, setup.sink));
        }

        let any_counted = cores.iter().any(|c| !c.counted_threads().is_empty());
        let totals = any_counted.then(|| TotalSensors::create(setup.factory, setup.sink));

        let l3 = L3Monitor::initialize(
            &setup.config.ccx_threads,
            setup.processor,
            setup.access,
            setup.sink,
            setup.factory,
        );

        tracing::info!(
            "AMD {} backend: {} cores, {} counted threads, {} CCX",
            capability.arch.name(),
            cores.len(),
            cores.iter().map(|c| c.counted_threads().len()).sum::<usize>(),
            l3.ccx_count()
        );

        Self {
            energy_unit,
            package,
            cores,
            threads: PerfContext::default(),
            totals,
            l3,
        }
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, pass: &mut Pass<'_, A, S>) {
        self.package.sample(pass.access, pass.sink, pass.factory, pass.now);

        for core in &mut self.cores {
            core.sample(pass.access, pass.sink, self.energy_unit, pass.now);
            for &thread in core.counted_threads() {
                self::core::sample_thread(
                    &mut self.threads,
                    thread,
                    pass.access,
                    pass.sink,
                    pass.factory,
                    pass.tick,
                );
            }
        }

        if let Some(totals) = &self.totals {
            totals.publish(&self.threads, pass.sink, pass.tick);
        }

        self.l3.sample(pass.access, pass.sink, pass.tick);
    }
}
