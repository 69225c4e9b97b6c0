//! Per-CCX L3 counters, programmed and read through one representative thread

use hwtelem_raw::arch::amd::l3::{msr, L3PerfCtl};
use hwtelem_raw::CounterRegister;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::counters::{LogOnError, CACHE_LINE_BYTES};
use crate::error::Result;
use crate::metrics::ratio::{hit_rate_from_sums, ratio, throughput};
use crate::metrics::{PerfContext, ThreadPerformanceData, Tick};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};
use crate::topology::Processor;

enum_with_data! {
    pub enum L3Event: (u8, u8) {
        Access => ("L3 access", (0x04, 0xFF)),
        Miss => ("L3 miss", (0x04, 0x01)),
        MissLatency => ("L3 miss latency", (0x90, 0x00)),
        MissRequests => ("L3 miss by request", (0x9A, 0x1F)),
    }
    impl selector -> (u8, u8)
}

/// Miss latency counts in units of 16 core clocks
const MISS_LATENCY_SCALE: u64 = 16;

const ACCESS: usize = 0;
const MISS: usize = 1;
const MISS_LATENCY: usize = 2;
const MISS_REQUESTS: usize = 3;

const L3_COUNTERS: [CounterRegister; 4] = msr::L3_PERF_CTR;

pub fn program_ccx<A: RegisterAccess>(access: &A, thread: u32) -> Result<()> {
    for (i, event) in L3Event::all().into_iter().enumerate() {
        let (event_select, umask) = event.selector();
        access.write_layout(msr::L3_PERF_CTL[i], &L3PerfCtl::all_slices(event_select, umask), thread)?;
    }
    for counter in L3_COUNTERS {
        access.clear_counter(counter, thread)?;
    }
    Ok(())
}

#[derive(Debug)]
struct L3Totals {
    hit_rate: SensorHandle,
    hit_bandwidth: SensorHandle,
    miss_latency: SensorHandle,
}

/// L3 state of every programmed CCX, keyed by representative thread
#[derive(Debug)]
pub struct L3Monitor {
    ccx: PerfContext<SensorHandle>,
    totals: Option<L3Totals>,
}

impl L3Monitor {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        ccx_threads: &[u32],
        processor: &Processor,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Self {
        let mut ccx = PerfContext::default();

        for (i, &thread) in ccx_threads.iter().enumerate() {
            if !processor.has_thread(thread) {
                tracing::debug!("CCX {i} representative thread {thread} not present, skipping");
                continue;
            }
            if program_ccx(access, thread)
                .or_warn(format_args!("L3 counters for CCX {i} on thread {thread}"))
                .is_none()
            {
                continue;
            }
            let sensor =
                factory.create_active(sink, format!("CCX {i} L3 Hit Bandwidth"), SensorKind::Throughput);
            ccx.get_or_insert_with(thread, || ThreadPerformanceData::new(&L3_COUNTERS, sensor));
        }

        let totals = (!ccx.is_empty()).then(|| L3Totals {
            hit_rate: factory.create_active(sink, "L3 Hitrate", SensorKind::Level),
            hit_bandwidth: factory.create_active(sink, "L3 Hit Bandwidth", SensorKind::Throughput),
            miss_latency: factory.create_active(
                sink,
                "L3 Miss Latency (core clocks)",
                SensorKind::CounterRatio,
            ),
        });

        Self { ccx, totals }
    }

    pub fn ccx_count(&self) -> usize {
        self.ccx.len()
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, access: &A, sink: &mut S, tick: Tick) {
        if !tick.reads_counters() {
            return;
        }

        let threads: Vec<u32> = self.ccx.iter().map(|(thread, _)| thread).collect();
        for thread in threads {
            let Some(data) = self.ccx.get_mut(thread) else {
                continue;
            };
            for (slot, counter) in L3_COUNTERS.iter().enumerate() {
                let reading = access
                    .read_counter(*counter, thread)
                    .or_debug(format_args!("L3 counter {:#x} on thread {thread}", counter.address));
                data.observe(slot, reading);
            }
        }

        let Some(elapsed) = tick.elapsed() else {
            return;
        };
        let seconds = elapsed.as_secs_f64();

        for (_, data) in self.ccx.iter() {
            if let Some([accesses, misses]) = data.deltas([ACCESS, MISS]) {
                sink.set_value(
                    data.sensors,
                    Some(throughput(accesses.saturating_sub(misses), CACHE_LINE_BYTES, seconds)),
                );
            }
        }

        if let Some(totals) = &self.totals {
            let accesses = self.ccx.sum(ACCESS);
            let misses = self.ccx.sum(MISS);
            sink.set_value(totals.hit_rate, Some(hit_rate_from_sums(misses, accesses)));
            sink.set_value(
                totals.hit_bandwidth,
                Some(throughput(accesses.saturating_sub(misses), CACHE_LINE_BYTES, seconds)),
            );
            sink.set_value(
                totals.miss_latency,
                Some(ratio(
                    (self.ccx.sum(MISS_LATENCY) * MISS_LATENCY_SCALE) as f64,
                    self.ccx.sum(MISS_REQUESTS) as f64,
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::testing::{amd_records, FakeAccess};
    use std::time::{Duration, Instant};

    use crate::metrics::IntervalClock;

    #[test]
    fn test_program_ccx_targets_representative() {
        let access = FakeAccess::new();
        program_ccx(&access, 8).unwrap();

        let writes = access.writes();
        assert_eq!(writes.len(), 8);
        assert!(writes.iter().all(|&(thread, _, _)| thread == 8));
        assert_eq!((writes[0].1, writes[0].2), (0xC001_0230, 0xFF0F_0000_0040_FF04));
        assert_eq!((writes[1].1, writes[1].2), (0xC001_0232, 0xFF0F_0000_0040_0104));
        assert_eq!(writes[4..].iter().map(|w| w.2).sum::<u64>(), 0);
    }

    #[test]
    fn test_missing_representatives_skipped() {
        let processor = Processor::build(amd_records(0x08, "AMD Ryzen 7 1700", 6, 2)).unwrap();
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");

        let monitor = L3Monitor::initialize(&[0, 8, 16, 24], &processor, &access, &mut sink, &mut factory);

        assert_eq!(monitor.ccx_count(), 2);
        assert!(sink.find("CCX 1 L3 Hit Bandwidth", SensorKind::Throughput).is_some());
        assert!(sink.find("CCX 2 L3 Hit Bandwidth", SensorKind::Throughput).is_none());
    }

    #[test]
    fn test_l3_totals_from_sums() {
        let processor = Processor::build(amd_records(0x08, "AMD Ryzen 7 1700", 8, 2)).unwrap();
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut monitor = L3Monitor::initialize(&[0, 8], &processor, &access, &mut sink, &mut factory);

        let start = Instant::now();
        let mut clock = IntervalClock::default();
        monitor.sample(&access, &mut sink, clock.tick(start));

        // CCX 0: 1000 accesses, 10 misses; CCX 1: 10 accesses, 5 misses
        for (thread, accesses, misses) in [(0, 1000, 10), (8, 10, 5)] {
            access.set_msr(thread, msr::L3_PERF_CTR[0].address, accesses);
            access.set_msr(thread, msr::L3_PERF_CTR[1].address, misses);
            access.set_msr(thread, msr::L3_PERF_CTR[2].address, 30);
            access.set_msr(thread, msr::L3_PERF_CTR[3].address, 4);
        }
        monitor.sample(&access, &mut sink, clock.tick(start + Duration::from_secs(1)));

        let hit_rate = sink.value("L3 Hitrate", SensorKind::Level).unwrap();
        assert!((hit_rate - (1.0 - 15.0 / 1010.0) * 100.0).abs() < 1e-9);
        assert_eq!(sink.value("L3 Hit Bandwidth", SensorKind::Throughput), Some(995.0 * 64.0));
        assert_eq!(sink.value("CCX 1 L3 Hit Bandwidth", SensorKind::Throughput), Some(5.0 * 64.0));
        assert_eq!(
            sink.value("L3 Miss Latency (core clocks)", SensorKind::CounterRatio),
            Some(60.0 * 16.0 / 8.0)
        );
    }
}
