//! Zen per-core P-state, energy and per-thread cache counters

use std::time::Instant;

use hwtelem_raw::arch::amd::perf::{msr, Hwcr, PerfCtl, CORE_COUNTERS};
use hwtelem_raw::arch::amd::power::{msr as power_msr, PStateStatus, AMD_REFERENCE_CLOCK_MHZ};
use hwtelem_raw::{CounterRegister, RegisterLayout};

use crate::access::{AffinityScope, RegisterAccess, RegisterAccessExt};
use crate::counters::{LogOnError, CACHE_LINE_BYTES, GIGA};
use crate::error::Result;
use crate::metrics::decode;
use crate::metrics::ratio::{hit_rate_from_sums, ratio, throughput};
use crate::metrics::{EnergyTracker, PerfContext, ThreadPerformanceData, Tick};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};
use crate::topology::Core;

enum_with_data! {
    pub enum CoreEvent: (u8, u8) {
        DcAccess => ("DC access", (0x40, 0x00)),
        DcMiss => ("DC miss", (0x41, 0x0B)),
        RefillFromL2 => ("DC refill from L2", (0x43, 0x01)),
        RefillFromL3 => ("DC refill from L3", (0x43, 0x02)),
        RefillFromDram => ("DC refill from DRAM", (0x43, 0x48)),
        RefillFromRemoteCcx => ("DC refill from remote CCX", (0x43, 0x10)),
    }
    impl selector -> (u8, u8)
}

/// Bytes per L1D load
const L1D_LOAD_BYTES: u64 = 8;

const INSTRUCTIONS: usize = 0;
const APERF: usize = 1;
const DC_ACCESS: usize = 2;
const DC_MISS: usize = 3;
const REFILL_L2: usize = 4;
const REFILL_L3: usize = 5;
const REFILL_DRAM: usize = 6;
const REFILL_REMOTE: usize = 7;

/// Counter read into each slot of a thread's performance data
const THREAD_COUNTERS: [CounterRegister; 2 + CORE_COUNTERS] = [
    msr::INSTRUCTIONS_RETIRED,
    msr::APERF,
    msr::PERF_CTR[0],
    msr::PERF_CTR[1],
    msr::PERF_CTR[2],
    msr::PERF_CTR[3],
    msr::PERF_CTR[4],
    msr::PERF_CTR[5],
];

/// Enable retired-instruction counting and program the six core counters
pub fn program_thread<A: RegisterAccess>(access: &A, thread: u32) -> Result<()> {
    let _pin = AffinityScope::enter(access, thread)?;

    let mut hwcr = Hwcr::from_msr_value(access.read_thread_msr(msr::HWCR, thread)?);
    hwcr.instructions_retired_enable = true;
    access.write_layout(msr::HWCR, &hwcr, thread)?;

    for (i, event) in CoreEvent::all().into_iter().enumerate() {
        let (event_select, umask) = event.selector();
        access.write_layout(msr::PERF_CTL[i], &PerfCtl::counting(event_select, umask), thread)?;
    }
    for counter in msr::PERF_CTR {
        access.clear_counter(counter, thread)?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct ThreadSensors {
    instructions: SensorHandle,
    ipc: SensorHandle,
    aperf: SensorHandle,
    l1d_hit_rate: SensorHandle,
    l2_hit_rate: SensorHandle,
}

impl ThreadSensors {
    fn create<S: TelemetrySink>(factory: &mut SensorFactory, sink: &mut S, thread: u32) -> Self {
        Self {
            instructions: factory.create_active(sink, format!("Thread {thread} Instructions"), SensorKind::Counter),
            ipc: factory.create_active(sink, format!("Thread {thread} IPC"), SensorKind::CounterRatio),
            aperf: factory.create_active(sink, format!("Thread {thread} APERF"), SensorKind::Counter),
            l1d_hit_rate: factory.create_active(sink, format!("Thread {thread} L1D Hitrate"), SensorKind::Level),
            l2_hit_rate: factory.create_active(sink, format!("Thread {thread} L2 Hitrate"), SensorKind::Level),
        }
    }
}

/// Per-core sensors and energy snapshot
#[derive(Debug)]
pub struct CoreMonitor {
    thread: u32,
    counted_threads: Vec<u32>,
    energy: EnergyTracker,
    clock: SensorHandle,
    multiplier: SensorHandle,
    power: SensorHandle,
    vid: SensorHandle,
}

impl CoreMonitor {
    pub fn new<S: TelemetrySink>(
        core: &Core,
        counted_threads: Vec<u32>,
        factory: &mut SensorFactory,
        sink: &mut S,
    ) -> Self {
        let name = format!("Core #{}", core.id);
        Self {
            thread: core.first_thread().id,
            counted_threads,
            energy: EnergyTracker::new(power_msr::CORE_ENERGY.width),
            clock: factory.create_active(sink, name.clone(), SensorKind::Clock),
            multiplier: factory.create_active(sink, name.clone(), SensorKind::Factor),
            power: factory.create_active(sink, format!("{name} (SMU)"), SensorKind::Power),
            vid: factory.create_active(sink, format!("{name} VID"), SensorKind::Voltage),
        }
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(
        &mut self,
        access: &A,
        sink: &mut S,
        energy_unit: f64,
        now: Instant,
    ) {
        let _pin = AffinityScope::enter(access, self.thread)
            .or_debug(format_args!("pinning to thread {}", self.thread));

        if let Some(raw) = access
            .read_counter(power_msr::CORE_ENERGY, self.thread)
            .or_debug(format_args!("core energy on thread {}", self.thread))
        {
            if let Some(interval) = self.energy.advance(raw, now) {
                sink.set_value(
                    self.power,
                    Some(decode::power(interval.delta, energy_unit, interval.elapsed)),
                );
            }
        }

        if let Some(raw) = access
            .read_thread_msr(power_msr::HARDWARE_PSTATE_STATUS, self.thread)
            .or_debug(format_args!("P-state status on thread {}", self.thread))
        {
            let status = PStateStatus::from_msr_value(raw);
            let multiplier = status.multiplier();
            sink.set_value(self.multiplier, Some(multiplier));
            sink.set_value(
                self.clock,
                Some(decode::clock(multiplier, AMD_REFERENCE_CLOCK_MHZ, 1.0)),
            );
            sink.set_value(self.vid, Some(decode::svi_voltage(status.vid)));
        }
    }

    pub fn counted_threads(&self) -> &[u32] {
        &self.counted_threads
    }
}

/// Read one thread's counters, creating its data and sensors on first sight
pub fn sample_thread<A: RegisterAccess, S: TelemetrySink>(
    threads: &mut PerfContext<ThreadSensors>,
    thread: u32,
    access: &A,
    sink: &mut S,
    factory: &mut SensorFactory,
    tick: Tick,
) {
    if !tick.reads_counters() {
        return;
    }

    let data = threads.get_or_insert_with(thread, || {
        ThreadPerformanceData::new(&THREAD_COUNTERS, ThreadSensors::create(factory, sink, thread))
    });

    for (slot, counter) in THREAD_COUNTERS.iter().enumerate() {
        let reading = access
            .read_counter(*counter, thread)
            .or_debug(format_args!("counter {:#x} on thread {thread}", counter.address));
        data.observe(slot, reading);
    }

    if tick.elapsed().is_none() {
        return;
    }

    let sensors = &data.sensors;
    if let Some(instructions) = data.delta(INSTRUCTIONS) {
        sink.set_value(sensors.instructions, Some(instructions as f64 / GIGA));
    }
    if let Some(aperf) = data.delta(APERF) {
        sink.set_value(sensors.aperf, Some(aperf as f64 / GIGA));
    }
    if let Some([instructions, aperf]) = data.deltas([INSTRUCTIONS, APERF]) {
        sink.set_value(sensors.ipc, Some(ratio(instructions as f64, aperf as f64)));
    }
    if let Some([misses, accesses]) = data.deltas([DC_MISS, DC_ACCESS]) {
        sink.set_value(sensors.l1d_hit_rate, Some(hit_rate_from_sums(misses, accesses)));
    }
    // Refills from L2 over L1 misses, not L2 hits over L2 requests
    if let Some([refills, misses]) = data.deltas([REFILL_L2, DC_MISS]) {
        sink.set_value(sensors.l2_hit_rate, Some(hit_rate_from_sums(refills, misses)));
    }
}

/// Package-wide totals over all counted threads
#[derive(Debug)]
pub struct TotalSensors {
    instructions: SensorHandle,
    unhalted_clocks: SensorHandle,
    ipc: SensorHandle,
    l1d_hit_rate: SensorHandle,
    l1d_hit_bandwidth: SensorHandle,
    l2_hit_rate: SensorHandle,
    l2_bandwidth: SensorHandle,
    l3_bandwidth: SensorHandle,
    dram_bandwidth: SensorHandle,
    remote_ccx_bandwidth: SensorHandle,
}

impl TotalSensors {
    pub fn create<S: TelemetrySink>(factory: &mut SensorFactory, sink: &mut S) -> Self {
        Self {
            instructions: factory.create_active(sink, "Total instructions", SensorKind::Counter),
            unhalted_clocks: factory.create_active(sink, "Total Unhalted Clocks", SensorKind::Counter),
            ipc: factory.create_active(sink, "Average IPC", SensorKind::CounterRatio),
            l1d_hit_rate: factory.create_active(sink, "L1D Hitrate", SensorKind::Level),
            l1d_hit_bandwidth: factory.create_active(sink, "L1D Hit Bandwidth", SensorKind::Throughput),
            l2_hit_rate: factory.create_active(sink, "L2 Hitrate", SensorKind::Level),
            l2_bandwidth: factory.create_active(sink, "L2 -> L1 Bandwidth", SensorKind::Throughput),
            l3_bandwidth: factory.create_active(sink, "L3 -> L1 Bandwidth", SensorKind::Throughput),
            dram_bandwidth: factory.create_active(sink, "DRAM -> L1 Bandwidth", SensorKind::Throughput),
            remote_ccx_bandwidth: factory.create_active(
                sink,
                "Remote CCX -> L1 Bandwidth",
                SensorKind::Throughput,
            ),
        }
    }

    /// Publish totals computed from summed deltas
    pub fn publish<S: TelemetrySink>(&self, threads: &PerfContext<ThreadSensors>, sink: &mut S, tick: Tick) {
        let Some(elapsed) = tick.elapsed() else {
            return;
        };
        if threads.is_empty() {
            return;
        }
        let seconds = elapsed.as_secs_f64();

        let instructions = threads.sum(INSTRUCTIONS);
        let clocks = threads.sum(APERF);
        let accesses = threads.sum(DC_ACCESS);
        let misses = threads.sum(DC_MISS);
        let refills_l2 = threads.sum(REFILL_L2);

        sink.set_value(self.instructions, Some(instructions as f64 / GIGA));
        sink.set_value(self.unhalted_clocks, Some(clocks as f64 / GIGA));
        sink.set_value(self.ipc, Some(ratio(instructions as f64, clocks as f64)));
        sink.set_value(self.l1d_hit_rate, Some(hit_rate_from_sums(misses, accesses)));
        sink.set_value(
            self.l1d_hit_bandwidth,
            Some(throughput(accesses.saturating_sub(misses), L1D_LOAD_BYTES, seconds)),
        );
        // same L2 refill over L1 miss formula as the per-thread rate
        sink.set_value(self.l2_hit_rate, Some(hit_rate_from_sums(refills_l2, misses)));

        for (sensor, slot) in [
            (self.l2_bandwidth, REFILL_L2),
            (self.l3_bandwidth, REFILL_L3),
            (self.dram_bandwidth, REFILL_DRAM),
            (self.remote_ccx_bandwidth, REFILL_REMOTE),
        ] {
            sink.set_value(sensor, Some(throughput(threads.sum(slot), CACHE_LINE_BYTES, seconds)));
        }
    }
}
