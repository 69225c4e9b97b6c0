//! Client integrated memory controller counters, read through the MCHBAR window

use hwtelem_raw::arch::intel::imc::{mmio, pci, ImcBar, CACHE_LINE_SIZE};
use hwtelem_raw::CounterRegister;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::counters::LogOnError;
use crate::error::Result;
use crate::metrics::ratio::throughput;
use crate::metrics::{CounterTrack, Tick};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};

/// Locate the BAR through the host bridge and check that it can be read
pub fn probe_bar<A: RegisterAccess>(access: &A) -> Result<ImcBar> {
    let host_bridge = access.pci_address(0, 0, 0);
    let low = access.read_pci_config(host_bridge, pci::MCHBAR_LOW)?;
    let high = access.read_pci_config(host_bridge, pci::MCHBAR_HIGH)?;
    let bar = ImcBar::from_halves(low, high);

    access.read_physical_memory::<u32>(bar.counter_address(mmio::DRAM_DATA_READS.address))?;
    Ok(bar)
}

#[derive(Debug)]
struct DramCounter {
    register: CounterRegister,
    track: CounterTrack,
    lines: Option<u64>,
}

impl DramCounter {
    fn new(register: CounterRegister) -> Self {
        Self {
            register,
            track: CounterTrack::new(register.width),
            lines: None,
        }
    }

    fn observe<A: RegisterAccess>(&mut self, access: &A, bar: ImcBar) {
        let address = bar.counter_address(self.register.address);
        self.lines = access
            .read_physical_memory::<u32>(address)
            .or_debug(format_args!("IMC counter at {address:#x}"))
            .and_then(|value| self.track.update(value as u64));
    }
}

#[derive(Debug)]
pub struct ImcMonitor {
    bar: ImcBar,
    reads: DramCounter,
    writes: DramCounter,
    read_bandwidth: SensorHandle,
    write_bandwidth: SensorHandle,
    total_bandwidth: SensorHandle,
}

impl ImcMonitor {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Option<Self> {
        let bar = probe_bar(access).or_warn("IMC BAR probe")?;
        tracing::info!("IMC counters at {:#x}", bar.base);

        Some(Self {
            bar,
            reads: DramCounter::new(mmio::DRAM_DATA_READS),
            writes: DramCounter::new(mmio::DRAM_DATA_WRITES),
            read_bandwidth: factory.create_active(sink, "DRAM Read Bandwidth", SensorKind::Throughput),
            write_bandwidth: factory.create_active(sink, "DRAM Write Bandwidth", SensorKind::Throughput),
            total_bandwidth: factory.create_active(sink, "Total DRAM Bandwidth", SensorKind::Throughput),
        })
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, access: &A, sink: &mut S, tick: Tick) {
        if !tick.reads_counters() {
            return;
        }
        self.reads.observe(access, self.bar);
        self.writes.observe(access, self.bar);

        let Some(elapsed) = tick.elapsed() else {
            return;
        };
        let seconds = elapsed.as_secs_f64();

        if let Some(reads) = self.reads.lines {
            sink.set_value(self.read_bandwidth, Some(throughput(reads, CACHE_LINE_SIZE, seconds)));
        }
        if let Some(writes) = self.writes.lines {
            sink.set_value(self.write_bandwidth, Some(throughput(writes, CACHE_LINE_SIZE, seconds)));
        }
        if let (Some(reads), Some(writes)) = (self.reads.lines, self.writes.lines) {
            sink.set_value(
                self.total_bandwidth,
                Some(throughput(reads + writes, CACHE_LINE_SIZE, seconds)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IntervalClock;
    use crate::sink::RecordingSink;
    use crate::testing::FakeAccess;
    use std::time::{Duration, Instant};

    const BAR: u64 = 0xFED1_0000;

    fn mapped_access() -> FakeAccess {
        let access = FakeAccess::new();
        let host_bridge = access.pci_address(0, 0, 0);
        access.set_pci(host_bridge, pci::MCHBAR_LOW, 0xFED1_0001);
        access.set_physical(BAR + mmio::DRAM_DATA_READS.address as u64, 0);
        access.set_physical(BAR + mmio::DRAM_DATA_WRITES.address as u64, 0);
        access
    }

    #[test]
    fn test_probe_fails_without_physical_memory() {
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        assert!(ImcMonitor::initialize(&access, &mut sink, &mut factory).is_none());
        assert!(sink.sensors().is_empty());
    }

    #[test]
    fn test_read_and_write_bandwidth() {
        let access = mapped_access();
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut imc = ImcMonitor::initialize(&access, &mut sink, &mut factory).unwrap();

        let start = Instant::now();
        let mut clock = IntervalClock::default();
        imc.sample(&access, &mut sink, clock.tick(start));

        access.set_physical(BAR + mmio::DRAM_DATA_READS.address as u64, 1_000);
        access.set_physical(BAR + mmio::DRAM_DATA_WRITES.address as u64, 250);
        imc.sample(&access, &mut sink, clock.tick(start + Duration::from_secs(1)));

        assert_eq!(sink.value("DRAM Read Bandwidth", SensorKind::Throughput), Some(64_000.0));
        assert_eq!(sink.value("DRAM Write Bandwidth", SensorKind::Throughput), Some(16_000.0));
        assert_eq!(sink.value("Total DRAM Bandwidth", SensorKind::Throughput), Some(80_000.0));
    }

    #[test]
    fn test_counter_wrap() {
        let access = mapped_access();
        access.set_physical(BAR + mmio::DRAM_DATA_READS.address as u64, u32::MAX - 9);
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut imc = ImcMonitor::initialize(&access, &mut sink, &mut factory).unwrap();

        let start = Instant::now();
        let mut clock = IntervalClock::default();
        imc.sample(&access, &mut sink, clock.tick(start));
        access.set_physical(BAR + mmio::DRAM_DATA_READS.address as u64, 10);
        imc.sample(&access, &mut sink, clock.tick(start + Duration::from_secs(1)));

        assert_eq!(sink.value("DRAM Read Bandwidth", SensorKind::Throughput), Some(19.0 * 64.0));
    }
}
