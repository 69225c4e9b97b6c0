//! Bus and per-core clocks derived from the TSC multiplier

use hwtelem_raw::arch::intel::clock::{msr, PerfStatus, PlatformInfo, RatioField};
use hwtelem_raw::RegisterLayout;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::capability::TscMultiplierSource;
use crate::counters::{core_name, LogOnError};
use crate::metrics::decode;
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};
use crate::topology::Processor;

/// Ratio of the TSC frequency to the bus clock, `None` when unavailable
pub fn probe_tsc_multiplier<A: RegisterAccess>(
    access: &A,
    source: TscMultiplierSource,
    thread: u32,
) -> Option<f64> {
    let multiplier = match source {
        TscMultiplierSource::None => return None,
        TscMultiplierSource::PerfStatusMax => access
            .read_thread_msr(msr::IA32_PERF_STATUS, thread)
            .or_warn("TSC multiplier from IA32_PERF_STATUS")
            .map(|raw| RatioField::HalfStep.decode(PerfStatus::from_msr_value(raw).max))?,
        TscMultiplierSource::PlatformInfo => access
            .read_thread_msr(msr::MSR_PLATFORM_INFO, thread)
            .or_warn("TSC multiplier from MSR_PLATFORM_INFO")
            .map(|raw| PlatformInfo::from_msr_value(raw).max_non_turbo_ratio as f64)?,
    };

    if multiplier > 0.0 {
        Some(multiplier)
    } else {
        tracing::warn!("TSC multiplier reads zero, core clocks fall back to the reference clock");
        None
    }
}

#[derive(Debug)]
pub struct ClockMonitor {
    reference_clock: f64,
    ratio_field: RatioField,
    multiplier: Option<f64>,
    bus: SensorHandle,
    bus_active: bool,
    cores: Vec<(u32, SensorHandle)>,
}

impl ClockMonitor {
    /// `None` when the processor has no time stamp counter
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        source: TscMultiplierSource,
        ratio_field: RatioField,
        reference_clock: f64,
        processor: &Processor,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Option<Self> {
        if !processor.identity().flags.time_stamp_counter {
            tracing::info!("No time stamp counter, core clocks disabled");
            return None;
        }

        let first_thread = processor.first_thread().map_or(0, |t| t.id);
        let multiplier = probe_tsc_multiplier(access, source, first_thread);
        if let Some(multiplier) = multiplier {
            tracing::info!("TSC multiplier {multiplier}");
        }

        let bus = factory.create(sink, "Bus Speed", SensorKind::Clock);
        let cores = processor
            .cores()
            .enumerate()
            .map(|(i, core)| {
                (
                    core.first_thread().id,
                    factory.create_active(sink, core_name(i), SensorKind::Clock),
                )
            })
            .collect();

        Some(Self {
            reference_clock,
            ratio_field,
            multiplier,
            bus,
            bus_active: false,
            cores,
        })
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, access: &A, sink: &mut S) {
        let Some(multiplier) = self.multiplier else {
            for &(_, handle) in &self.cores {
                sink.set_value(handle, Some(self.reference_clock));
            }
            return;
        };

        for &(thread, handle) in &self.cores {
            // a failed read keeps the previous clock
            let Some(raw) = access
                .read_thread_msr(msr::IA32_PERF_STATUS, thread)
                .or_debug(format_args!("IA32_PERF_STATUS on thread {thread}"))
            else {
                continue;
            };
            let ratio = self.ratio_field.decode(PerfStatus::from_msr_value(raw).current);
            sink.set_value(handle, Some(decode::clock(ratio, self.reference_clock, multiplier)));
        }

        if !self.bus_active {
            sink.activate_sensor(self.bus);
            self.bus_active = true;
        }
        sink.set_value(self.bus, Some(self.reference_clock / multiplier));
    }
}
