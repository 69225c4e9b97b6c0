//! Digital thermal sensors: per-core and package distance to TjMax

use hwtelem_raw::arch::intel::thermal::{msr, TemperatureTarget, ThermStatus};
use hwtelem_raw::RegisterLayout;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::capability::{ThermalCeiling, DEFAULT_CEILING};
use crate::counters::{core_name, LogOnError};
use crate::metrics::decode;
use crate::sink::{SensorFactory, SensorHandle, SensorKind, SensorParameter, TelemetrySink};
use crate::topology::Processor;

const TJ_MAX: usize = 0;
const T_SLOPE: usize = 1;

const CORE_TJ_MAX: &str = "TjMax temperature of the core sensor.\nTemperature = TjMax - TSlope * Value.";
const PACKAGE_TJ_MAX: &str =
    "TjMax temperature of the package sensor.\nTemperature = TjMax - TSlope * Value.";
const T_SLOPE_DESCRIPTION: &str =
    "Temperature slope of the digital thermal sensor.\nTemperature = TjMax - TSlope * Value.";

fn parameters(tj_max_description: &'static str, tj_max: f64) -> Vec<SensorParameter> {
    vec![
        SensorParameter {
            name: "TjMax [°C]",
            description: tj_max_description,
            default: tj_max,
        },
        SensorParameter {
            name: "TSlope [°C]",
            description: T_SLOPE_DESCRIPTION,
            default: 1.0,
        },
    ]
}

/// TjMax of the core whose first thread is `thread`
///
/// A failed read or a zero field falls back to [`DEFAULT_CEILING`].
pub fn probe_tj_max<A: RegisterAccess>(access: &A, ceiling: ThermalCeiling, thread: u32) -> f64 {
    match ceiling {
        ThermalCeiling::Fixed(value) => value,
        ThermalCeiling::FromMsr => {
            let probed = access
                .read_thread_msr(msr::IA32_TEMPERATURE_TARGET, thread)
                .or_warn(format_args!("TjMax on thread {thread}"))
                .map(|raw| TemperatureTarget::from_msr_value(raw).tj_max);
            match probed {
                Some(tj_max) if tj_max > 0 => tj_max as f64,
                Some(_) => {
                    tracing::warn!("TjMax on thread {thread} reads zero, assuming {DEFAULT_CEILING} °C");
                    DEFAULT_CEILING
                }
                None => DEFAULT_CEILING,
            }
        }
    }
}

#[derive(Debug)]
struct CoreSensor {
    thread: u32,
    temperature: SensorHandle,
    distance: SensorHandle,
}

#[derive(Debug)]
pub struct ThermalMonitor {
    cores: Vec<CoreSensor>,
    package: Option<(u32, SensorHandle)>,
    max_average: Option<(SensorHandle, SensorHandle)>,
}

impl ThermalMonitor {
    /// `None` when the processor reports no core-level thermal sensor
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        ceiling: ThermalCeiling,
        processor: &Processor,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Option<Self> {
        let flags = processor.identity().flags;
        if !flags.thermal_sensor {
            tracing::info!("No digital thermal sensor reported");
            return None;
        }

        let tj_max: Vec<(u32, f64)> = processor
            .cores()
            .map(|core| {
                let thread = core.first_thread().id;
                (thread, probe_tj_max(access, ceiling, thread))
            })
            .collect();

        let temperatures: Vec<SensorHandle> = tj_max
            .iter()
            .enumerate()
            .map(|(i, &(_, ceiling))| {
                let handle = factory.create_with_parameters(
                    sink,
                    core_name(i),
                    SensorKind::Temperature,
                    parameters(CORE_TJ_MAX, ceiling),
                );
                sink.activate_sensor(handle);
                handle
            })
            .collect();

        let package = match (flags.package_thermal_sensor, tj_max.first()) {
            (true, Some(&(thread, ceiling))) => {
                let handle = factory.create_with_parameters(
                    sink,
                    "CPU Package",
                    SensorKind::Temperature,
                    parameters(PACKAGE_TJ_MAX, ceiling),
                );
                sink.activate_sensor(handle);
                Some((thread, handle))
            }
            _ => None,
        };

        let cores: Vec<CoreSensor> = tj_max
            .iter()
            .zip(temperatures)
            .enumerate()
            .map(|(i, (&(thread, _), temperature))| CoreSensor {
                thread,
                temperature,
                distance: factory.create_active(
                    sink,
                    format!("{} Distance to TjMax", core_name(i)),
                    SensorKind::Temperature,
                ),
            })
            .collect();

        let max_average = (flags.package_thermal_sensor && cores.len() > 1).then(|| {
            (
                factory.create_active(sink, "Core Max", SensorKind::Temperature),
                factory.create_active(sink, "Core Average", SensorKind::Temperature),
            )
        });

        Some(Self {
            cores,
            package,
            max_average,
        })
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&self, access: &A, sink: &mut S) {
        let mut valid = Vec::with_capacity(self.cores.len());

        for core in &self.cores {
            let Some(status) = read_status(access, msr::IA32_THERM_STATUS, core.thread) else {
                continue;
            };
            if !status.reading_valid {
                sink.set_value(core.temperature, None);
                sink.set_value(core.distance, None);
                continue;
            }
            let t = calibrated(sink, core.temperature, status.distance);
            sink.set_value(core.temperature, Some(t));
            sink.set_value(core.distance, Some(status.distance as f64));
            valid.push(t);
        }

        if let (Some((max, average)), false) = (self.max_average, valid.is_empty()) {
            sink.set_value(max, Some(valid.iter().copied().fold(f64::MIN, f64::max)));
            sink.set_value(average, Some(valid.iter().sum::<f64>() / valid.len() as f64));
        }

        if let Some((thread, handle)) = self.package {
            if let Some(status) = read_status(access, msr::IA32_PACKAGE_THERM_STATUS, thread) {
                let value = status
                    .reading_valid
                    .then(|| calibrated(sink, handle, status.distance));
                sink.set_value(handle, value);
            }
        }
    }
}

fn read_status<A: RegisterAccess>(access: &A, msr: u32, thread: u32) -> Option<ThermStatus> {
    access
        .read_thread_msr(msr, thread)
        .or_debug(format_args!("thermal status {msr:#x} on thread {thread}"))
        .map(ThermStatus::from_msr_value)
}

fn calibrated<S: TelemetrySink>(sink: &S, handle: SensorHandle, distance: u8) -> f64 {
    let tj_max = sink.parameter(handle, TJ_MAX).unwrap_or(DEFAULT_CEILING);
    let slope = sink.parameter(handle, T_SLOPE).unwrap_or(1.0);
    decode::temperature(tj_max, slope, distance as u32, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::testing::{intel_records, FakeAccess};
    use std::collections::HashMap;

    fn status(distance: u64, valid: bool) -> u64 {
        (distance << 16) | if valid { 1 << 31 } else { 0 }
    }

    fn setup(access: &FakeAccess, sink: &mut RecordingSink, cores: u32) -> ThermalMonitor {
        let processor = Processor::build(intel_records(0x5E, 3, cores, 2)).unwrap();
        let mut factory = SensorFactory::new("cpu/0");
        ThermalMonitor::initialize(ThermalCeiling::FromMsr, &processor, access, sink, &mut factory).unwrap()
    }

    #[test]
    fn test_tj_max_probe_fallbacks() {
        let access = FakeAccess::new();
        access.set_msr(0, msr::IA32_TEMPERATURE_TARGET, 90 << 16);
        assert_eq!(probe_tj_max(&access, ThermalCeiling::FromMsr, 0), 90.0);
        assert_eq!(probe_tj_max(&access, ThermalCeiling::FromMsr, 1), DEFAULT_CEILING);
        assert_eq!(probe_tj_max(&access, ThermalCeiling::Fixed(85.0), 0), 85.0);

        access.fail_msr(msr::IA32_TEMPERATURE_TARGET);
        assert_eq!(probe_tj_max(&access, ThermalCeiling::FromMsr, 0), DEFAULT_CEILING);
    }

    #[test]
    fn test_core_temperatures_and_aggregates() {
        let access = FakeAccess::new();
        for thread in 0..2 {
            access.set_msr(thread, msr::IA32_TEMPERATURE_TARGET, 100 << 16);
        }
        let mut sink = RecordingSink::new();
        let monitor = setup(&access, &mut sink, 2);

        // thread ids of core 1 and core 2 are 0 and 1
        access.set_msr(0, msr::IA32_THERM_STATUS, status(50, true));
        access.set_msr(1, msr::IA32_THERM_STATUS, status(30, true));
        access.set_msr(0, msr::IA32_PACKAGE_THERM_STATUS, status(28, true));
        monitor.sample(&access, &mut sink);

        assert_eq!(sink.value("CPU Core #1", SensorKind::Temperature), Some(50.0));
        assert_eq!(sink.value("CPU Core #2", SensorKind::Temperature), Some(70.0));
        assert_eq!(sink.value("CPU Core #2 Distance to TjMax", SensorKind::Temperature), Some(30.0));
        assert_eq!(sink.value("CPU Package", SensorKind::Temperature), Some(72.0));
        assert_eq!(sink.value("Core Max", SensorKind::Temperature), Some(70.0));
        assert_eq!(sink.value("Core Average", SensorKind::Temperature), Some(60.0));
    }

    #[test]
    fn test_invalid_reading_is_absent() {
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let monitor = setup(&access, &mut sink, 2);

        access.set_msr(0, msr::IA32_THERM_STATUS, status(50, true));
        access.set_msr(1, msr::IA32_THERM_STATUS, status(30, true));
        monitor.sample(&access, &mut sink);

        access.set_msr(1, msr::IA32_THERM_STATUS, status(30, false));
        monitor.sample(&access, &mut sink);

        assert_eq!(sink.value("CPU Core #2", SensorKind::Temperature), None);
        assert_eq!(sink.value("CPU Core #2 Distance to TjMax", SensorKind::Temperature), None);
        // aggregates cover valid readings only
        assert_eq!(sink.value("Core Max", SensorKind::Temperature), Some(50.0));
        assert_eq!(sink.value("Core Average", SensorKind::Temperature), Some(50.0));
    }

    #[test]
    fn test_read_failure_keeps_previous_value() {
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let monitor = setup(&access, &mut sink, 1);

        access.set_msr(0, msr::IA32_THERM_STATUS, status(40, true));
        monitor.sample(&access, &mut sink);
        access.fail_msr(msr::IA32_THERM_STATUS);
        monitor.sample(&access, &mut sink);

        assert_eq!(sink.value("CPU Core #1", SensorKind::Temperature), Some(60.0));
        assert!(sink.find("Core Max", SensorKind::Temperature).is_none());
    }

    #[test]
    fn test_parameter_override_changes_calibration() {
        let access = FakeAccess::new();
        let overrides = HashMap::from([
            (("CPU Core #1".to_string(), TJ_MAX), 95.0),
            (("CPU Core #1".to_string(), T_SLOPE), 2.0),
        ]);
        let mut sink = RecordingSink::with_overrides(overrides);
        let monitor = setup(&access, &mut sink, 1);

        access.set_msr(0, msr::IA32_THERM_STATUS, status(10, true));
        monitor.sample(&access, &mut sink);

        assert_eq!(sink.value("CPU Core #1", SensorKind::Temperature), Some(75.0));
    }
}
