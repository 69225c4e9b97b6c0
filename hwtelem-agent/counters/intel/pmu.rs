//! Core PMU: fixed counters for instructions and cycles, optional PMC cache events

use hwtelem_raw::arch::intel::core::{
    msr, FixedCounterMode, FixedCtrCtrl, PerfEvtSel, PerfGlobalCtrl, CORE_PMU_COUNTERS,
};
use hwtelem_raw::CounterRegister;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::counters::{LogOnError, CACHE_LINE_BYTES, GIGA};
use crate::error::Result;
use crate::metrics::ratio::{hit_rate_from_sums, percent_of, ratio, throughput};
use crate::metrics::{PerfContext, ThreadPerformanceData, Tick};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};
use crate::topology::Processor;

enum_with_data! {
    pub enum CacheEvent: (u8, u8) {
        L1HitLoads => ("retired loads hitting L1D", (0xD1, 0x01)),
        RetiredLoads => ("retired loads", (0xD0, 0x81)),
        L2Misses => ("L2 misses", (0x24, 0x3F)),
        L2Requests => ("L2 requests", (0x24, 0xFF)),
    }
    impl selector -> (u8, u8)
}

/// Client parts load 32 bytes per L1D access
const L1D_LOAD_BYTES: u64 = 32;

const INSTRUCTIONS: usize = 0;
const CYCLES: usize = 1;
const L1_HITS: usize = 2;
const LOADS: usize = 3;
const L2_MISSES: usize = 4;
const L2_REQUESTS: usize = 5;

const FIXED_COUNTERS: [CounterRegister; 2] = [msr::IA32_FIXED_CTR0, msr::IA32_FIXED_CTR1];

const ALL_COUNTERS: [CounterRegister; 2 + CORE_PMU_COUNTERS] = [
    msr::IA32_FIXED_CTR0,
    msr::IA32_FIXED_CTR1,
    msr::IA32_A_PMC[0],
    msr::IA32_A_PMC[1],
    msr::IA32_A_PMC[2],
    msr::IA32_A_PMC[3],
];

/// Enable and clear the core counters of one thread
pub fn program_thread<A: RegisterAccess>(access: &A, thread: u32, cache_pmcs: bool) -> Result<()> {
    access.read_thread_msr(msr::IA32_PERF_GLOBAL_CTRL, thread)?;

    access.write_layout(msr::IA32_PERF_GLOBAL_CTRL, &PerfGlobalCtrl::all(), thread)?;
    access.write_layout(
        msr::IA32_FIXED_CTR_CTRL,
        &FixedCtrCtrl::all(FixedCounterMode::USR_OS),
        thread,
    )?;

    if cache_pmcs {
        for (i, event) in CacheEvent::all().into_iter().enumerate() {
            let (event_select, umask) = event.selector();
            access.write_layout(
                msr::IA32_PERFEVTSEL[i],
                &PerfEvtSel::counting(event_select, umask),
                thread,
            )?;
        }
    }

    for counter in [msr::IA32_FIXED_CTR0, msr::IA32_FIXED_CTR1, msr::IA32_FIXED_CTR2] {
        access.clear_counter(counter, thread)?;
    }
    for counter in msr::IA32_A_PMC {
        access.clear_counter(counter, thread)?;
    }
    Ok(())
}

#[derive(Debug)]
struct CacheSensors {
    l1d_bandwidth: SensorHandle,
    l2_bandwidth: SensorHandle,
    l1d_hit_rate: SensorHandle,
    l2_hit_rate: SensorHandle,
}

#[derive(Debug)]
pub struct ThreadSensors {
    instructions: SensorHandle,
    cycles: SensorHandle,
    ipc: SensorHandle,
    cache: Option<CacheSensors>,
}

#[derive(Debug)]
struct TotalSensors {
    instructions: SensorHandle,
    cycles: SensorHandle,
    ipc: SensorHandle,
    cache: Option<CacheSensors>,
}

#[derive(Debug)]
pub struct PmuMonitor {
    counters: &'static [CounterRegister],
    threads: PerfContext<ThreadSensors>,
    totals: TotalSensors,
}

impl PmuMonitor {
    /// `None` when no thread could be programmed
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        cache_pmcs: bool,
        processor: &Processor,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Option<Self> {
        let counters: &'static [CounterRegister] = if cache_pmcs {
            &ALL_COUNTERS
        } else {
            &FIXED_COUNTERS
        };

        let mut threads = PerfContext::default();
        for (core_index, core) in processor.cores().enumerate() {
            for (thread_index, thread) in core.threads.iter().enumerate() {
                if program_thread(access, thread.id, cache_pmcs)
                    .or_warn(format_args!("core PMU on thread {}", thread.id))
                    .is_none()
                {
                    continue;
                }

                let name = |metric: &str| format!("Core {core_index} Thread {thread_index} {metric}");
                let instructions = factory.create_active(sink, name("Instructions"), SensorKind::Counter);
                let cycles = factory.create_active(sink, name("Active Cycles"), SensorKind::Counter);
                let ipc = factory.create_active(sink, name("IPC"), SensorKind::CounterRatio);
                let cache = cache_pmcs.then(|| CacheSensors {
                    l1d_bandwidth: factory.create_active(sink, name("L1D Load Bandwidth"), SensorKind::Throughput),
                    l2_bandwidth: factory.create_active(sink, name("L2 Bandwidth"), SensorKind::Throughput),
                    l1d_hit_rate: factory.create_active(sink, name("L1D Hitrate"), SensorKind::Level),
                    l2_hit_rate: factory.create_active(sink, name("L2 Hitrate"), SensorKind::Level),
                });
                let sensors = ThreadSensors {
                    instructions,
                    cycles,
                    ipc,
                    cache,
                };
                threads.get_or_insert_with(thread.id, || ThreadPerformanceData::new(counters, sensors));
            }
        }

        if threads.is_empty() {
            return None;
        }

        let totals = TotalSensors {
            instructions: factory.create_active(sink, "Total Instructions", SensorKind::Counter),
            cycles: factory.create_active(sink, "Total Active Thread Cycles", SensorKind::Counter),
            ipc: factory.create_active(sink, "Average IPC", SensorKind::CounterRatio),
            cache: cache_pmcs.then(|| CacheSensors {
                l1d_bandwidth: factory.create_active(sink, "Total L1D Load Bandwidth", SensorKind::Throughput),
                l2_bandwidth: factory.create_active(sink, "Total L2 Load Bandwidth", SensorKind::Throughput),
                l1d_hit_rate: factory.create_active(sink, "Average L1D Hitrate", SensorKind::Level),
                l2_hit_rate: factory.create_active(sink, "Average L2 Hitrate", SensorKind::Level),
            }),
        };

        Some(Self {
            counters,
            threads,
            totals,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, access: &A, sink: &mut S, tick: Tick) {
        if !tick.reads_counters() {
            return;
        }

        let ids: Vec<u32> = self.threads.iter().map(|(thread, _)| thread).collect();
        for thread in ids {
            let Some(data) = self.threads.get_mut(thread) else {
                continue;
            };
            for (slot, counter) in self.counters.iter().enumerate() {
                let reading = access
                    .read_counter(*counter, thread)
                    .or_debug(format_args!("counter {:#x} on thread {thread}", counter.address));
                data.observe(slot, reading);
            }
        }

        let Some(elapsed) = tick.elapsed() else {
            return;
        };
        let seconds = elapsed.as_secs_f64();

        for (_, data) in self.threads.iter() {
            publish_thread(data, sink, seconds);
        }

        let instructions = self.threads.sum(INSTRUCTIONS);
        let cycles = self.threads.sum(CYCLES);
        sink.set_value(self.totals.instructions, Some(instructions as f64 / GIGA));
        sink.set_value(self.totals.cycles, Some(cycles as f64 / GIGA));
        sink.set_value(self.totals.ipc, Some(ratio(instructions as f64, cycles as f64)));

        if let Some(cache) = &self.totals.cache {
            let l1_hits = self.threads.sum(L1_HITS);
            let loads = self.threads.sum(LOADS);
            let l2_misses = self.threads.sum(L2_MISSES);
            let l2_requests = self.threads.sum(L2_REQUESTS);
            sink.set_value(cache.l1d_bandwidth, Some(throughput(l1_hits, L1D_LOAD_BYTES, seconds)));
            sink.set_value(
                cache.l2_bandwidth,
                Some(throughput(l2_requests.saturating_sub(l2_misses), CACHE_LINE_BYTES, seconds)),
            );
            sink.set_value(cache.l1d_hit_rate, Some(percent_of(l1_hits, loads)));
            sink.set_value(cache.l2_hit_rate, Some(hit_rate_from_sums(l2_misses, l2_requests)));
        }
    }
}

fn publish_thread<S: TelemetrySink>(data: &ThreadPerformanceData<ThreadSensors>, sink: &mut S, seconds: f64) {
    let sensors = &data.sensors;
    if let Some(instructions) = data.delta(INSTRUCTIONS) {
        sink.set_value(sensors.instructions, Some(instructions as f64 / GIGA));
    }
    if let Some(cycles) = data.delta(CYCLES) {
        sink.set_value(sensors.cycles, Some(cycles as f64 / GIGA));
    }
    if let Some([instructions, cycles]) = data.deltas([INSTRUCTIONS, CYCLES]) {
        sink.set_value(sensors.ipc, Some(ratio(instructions as f64, cycles as f64)));
    }

    let Some(cache) = &sensors.cache else {
        return;
    };
    if let Some([hits, loads]) = data.deltas([L1_HITS, LOADS]) {
        sink.set_value(cache.l1d_bandwidth, Some(throughput(hits, L1D_LOAD_BYTES, seconds)));
        sink.set_value(cache.l1d_hit_rate, Some(percent_of(hits, loads)));
    }
    if let Some([misses, requests]) = data.deltas([L2_MISSES, L2_REQUESTS]) {
        sink.set_value(
            cache.l2_bandwidth,
            Some(throughput(requests.saturating_sub(misses), CACHE_LINE_BYTES, seconds)),
        );
        sink.set_value(cache.l2_hit_rate, Some(hit_rate_from_sums(misses, requests)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IntervalClock;
    use crate::sink::RecordingSink;
    use crate::testing::{intel_records, FakeAccess};
    use std::time::{Duration, Instant};

    #[test]
    fn test_program_thread_write_sequence() {
        let access = FakeAccess::new();
        program_thread(&access, 3, true).unwrap();

        let writes: Vec<(u32, u64)> = access.writes().iter().map(|&(_, m, v)| (m, v)).collect();
        assert_eq!(
            writes[..6],
            [
                (0x38F, 0x7_0000_000F),
                (0x38D, 0x333),
                (0x186, 0x43_01D1),
                (0x187, 0x43_81D0),
                (0x188, 0x43_3F24),
                (0x189, 0x43_FF24),
            ]
        );
        let clears: Vec<u32> = writes[6..].iter().map(|&(m, _)| m).collect();
        assert_eq!(clears, vec![0x309, 0x30A, 0x30B, 0x4C1, 0x4C2, 0x4C3, 0x4C4]);
        assert!(writes[6..].iter().all(|&(_, v)| v == 0));
        assert!(access.writes().iter().all(|&(t, _, _)| t == 3));
    }

    #[test]
    fn test_fixed_only_skips_event_selects() {
        let access = FakeAccess::new();
        program_thread(&access, 0, false).unwrap();
        assert!(access.writes().iter().all(|&(_, m, _)| !(0x186..=0x189).contains(&m)));
    }

    #[test]
    fn test_failed_thread_excluded() {
        let processor = Processor::build(intel_records(0x2A, 7, 2, 1)).unwrap();
        let access = FakeAccess::new();
        access.fail_msr(msr::IA32_PERF_GLOBAL_CTRL);
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");

        assert!(PmuMonitor::initialize(false, &processor, &access, &mut sink, &mut factory).is_none());
        assert!(sink.sensors().is_empty());
    }

    #[test]
    fn test_thread_and_total_metrics() {
        let processor = Processor::build(intel_records(0x5E, 3, 2, 1)).unwrap();
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut pmu = PmuMonitor::initialize(true, &processor, &access, &mut sink, &mut factory).unwrap();
        assert_eq!(pmu.thread_count(), 2);

        let start = Instant::now();
        let mut clock = IntervalClock::default();
        pmu.sample(&access, &mut sink, clock.tick(start));

        // (instructions, cycles, l1 hits, loads, l2 misses, l2 requests)
        for (thread, values) in [(0u32, [4_000u64, 2_000, 900, 1_000, 10, 100]), (1, [1_000, 1_000, 50, 100, 0, 0])] {
            for (counter, value) in ALL_COUNTERS.iter().zip(values) {
                access.set_msr(thread, counter.address, value);
            }
        }
        pmu.sample(&access, &mut sink, clock.tick(start + Duration::from_secs(2)));

        assert_eq!(sink.value("Core 0 Thread 0 IPC", SensorKind::CounterRatio), Some(2.0));
        assert_eq!(sink.value("Core 0 Thread 0 L1D Hitrate", SensorKind::Level), Some(90.0));
        assert_eq!(sink.value("Core 0 Thread 0 L2 Hitrate", SensorKind::Level), Some(90.0));
        assert_eq!(
            sink.value("Core 0 Thread 0 L1D Load Bandwidth", SensorKind::Throughput),
            Some(900.0 * 32.0 / 2.0)
        );
        assert!(sink
            .value("Core 1 Thread 0 L2 Hitrate", SensorKind::Level)
            .is_some_and(f64::is_nan));

        assert_eq!(sink.value("Average IPC", SensorKind::CounterRatio), Some(5_000.0 / 3_000.0));
        let l1 = sink.value("Average L1D Hitrate", SensorKind::Level).unwrap();
        assert!((l1 - 950.0 / 1_100.0 * 100.0).abs() < 1e-9);
        assert_eq!(sink.value("Average L2 Hitrate", SensorKind::Level), Some(90.0));
        assert_eq!(
            sink.value("Total L2 Load Bandwidth", SensorKind::Throughput),
            Some(90.0 * 64.0 / 2.0)
        );
    }
}
