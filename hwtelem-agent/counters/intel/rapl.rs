//! RAPL energy counters converted to watts

use std::time::Instant;

use hwtelem_raw::arch::intel::rapl::{msr, RaplDomain, RaplPowerUnit};
use hwtelem_raw::RegisterLayout;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::capability::EnergyUnit;
use crate::counters::LogOnError;
use crate::metrics::{decode, EnergyTracker};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};

fn domain_name(domain: RaplDomain) -> &'static str {
    match domain {
        RaplDomain::Package => "CPU Package",
        RaplDomain::Cores => "CPU Cores",
        RaplDomain::Graphics => "CPU Graphics",
        RaplDomain::Memory => "CPU Memory",
    }
}

#[derive(Debug)]
struct DomainMonitor {
    domain: RaplDomain,
    energy: EnergyTracker,
    sensor: SensorHandle,
}

#[derive(Debug)]
pub struct RaplMonitor {
    thread: u32,
    energy_unit: f64,
    domains: Vec<DomainMonitor>,
}

impl RaplMonitor {
    /// Probe the power unit, then every domain; `None` when no domain remains
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        rule: EnergyUnit,
        thread: u32,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
        now: Instant,
    ) -> Option<Self> {
        let power_unit = if rule.needs_power_unit() {
            Some(
                access
                    .read_thread_msr(msr::MSR_RAPL_POWER_UNIT, thread)
                    .or_warn("RAPL power unit")
                    .map(RaplPowerUnit::from_msr_value)?,
            )
        } else {
            None
        };
        let energy_unit = rule.joules(power_unit).filter(|&unit| unit > 0.0)?;

        let mut domains = Vec::new();
        for domain in RaplDomain::ALL {
            let counter = domain.energy_status();
            let Some(value) = access
                .read_counter(counter, thread)
                .or_warn(format_args!("{} energy counter", domain_name(domain)))
            else {
                continue;
            };
            domains.push(DomainMonitor {
                domain,
                energy: EnergyTracker::primed(counter.width, value, now),
                sensor: factory.create_active(sink, domain_name(domain), SensorKind::Power),
            });
        }

        if domains.is_empty() {
            return None;
        }
        tracing::info!("RAPL: {} domains, {energy_unit} J per count", domains.len());

        Some(Self {
            thread,
            energy_unit,
            domains,
        })
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, access: &A, sink: &mut S, now: Instant) {
        for domain in &mut self.domains {
            let Some(value) = access
                .read_counter(domain.domain.energy_status(), self.thread)
                .or_debug(format_args!("{} energy counter", domain_name(domain.domain)))
            else {
                continue;
            };
            if let Some(interval) = domain.energy.advance(value, now) {
                sink.set_value(
                    domain.sensor,
                    Some(decode::power(interval.delta, self.energy_unit, interval.elapsed)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::testing::FakeAccess;
    use std::time::Duration;

    #[test]
    fn test_failed_domain_disabled_alone() {
        let access = FakeAccess::new();
        // ESU 14: 1/16384 J per count
        access.set_msr(0, msr::MSR_RAPL_POWER_UNIT, 14 << 8);
        access.fail_msr(msr::MSR_PP1_ENERGY_STATUS.address);

        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let start = Instant::now();
        let mut rapl =
            RaplMonitor::initialize(EnergyUnit::Log2Scaled, 0, &access, &mut sink, &mut factory, start).unwrap();

        assert!(sink.find("CPU Graphics", SensorKind::Power).is_none());
        assert!(sink.find("CPU Memory", SensorKind::Power).is_some());

        access.set_msr(0, msr::MSR_PKG_ENERGY_STATUS.address, 16384 * 30);
        rapl.sample(&access, &mut sink, start + Duration::from_secs(2));
        assert_eq!(sink.value("CPU Package", SensorKind::Power), Some(15.0));
    }

    #[test]
    fn test_power_unit_failure_disables_rapl() {
        let access = FakeAccess::new();
        access.fail_msr(msr::MSR_RAPL_POWER_UNIT);
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");

        let rapl =
            RaplMonitor::initialize(EnergyUnit::Log2Scaled, 0, &access, &mut sink, &mut factory, Instant::now());
        assert!(rapl.is_none());
        assert!(sink.sensors().is_empty());
    }

    #[test]
    fn test_counter_wrap_and_short_interval() {
        let access = FakeAccess::new();
        access.set_msr(0, msr::MSR_RAPL_POWER_UNIT, 0);
        access.set_msr(0, msr::MSR_PKG_ENERGY_STATUS.address, 0xFFFF_FFF0);

        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let start = Instant::now();
        let mut rapl =
            RaplMonitor::initialize(EnergyUnit::Log2Scaled, 0, &access, &mut sink, &mut factory, start).unwrap();

        access.set_msr(0, msr::MSR_PKG_ENERGY_STATUS.address, 0x10);
        rapl.sample(&access, &mut sink, start + Duration::from_millis(5));
        assert_eq!(sink.value("CPU Package", SensorKind::Power), None);

        // (0xFFFFFFFF - 0xFFFFFFF0) + 0x10 = 31 counts of 1 J over one second
        rapl.sample(&access, &mut sink, start + Duration::from_secs(1));
        assert_eq!(sink.value("CPU Package", SensorKind::Power), Some(31.0));
    }
}
