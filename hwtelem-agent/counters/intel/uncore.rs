//! Client uncore: C-box L3 lookups and the uncore clock
//!
//! Uncore MSRs are package scoped. They are addressed through the first
//! thread of the package, with no affinity change.

use hwtelem_raw::arch::intel::uncore::{
    msr, CboConfig, CboPerfEvtSel, CboxLayout, UncPerfFixedCtrl, UncPerfGlobalCtrl,
};
use hwtelem_raw::RegisterLayout;

use crate::access::{RegisterAccess, RegisterAccessExt};
use crate::counters::{LogOnError, CACHE_LINE_BYTES, GIGA};
use crate::error::Result;
use crate::metrics::ratio::{percent_of, ratio, throughput};
use crate::metrics::{CounterTrack, Tick};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};

enum_with_data! {
    pub enum CboEvent: (u8, u8) {
        L3Hits => ("L3 lookups hitting a valid line", (0x34, 0x86)),
        L3Lookups => ("L3 lookups in any state", (0x34, 0x8F)),
    }
    impl selector -> (u8, u8)
}

const HITS: usize = 0;
const LOOKUPS: usize = 1;

/// Enable the uncore PMU and program every C-box, returning the bank count
pub fn program_uncore<A: RegisterAccess>(access: &A, layout: CboxLayout, thread: u32) -> Result<u32> {
    let config = CboConfig::from_msr_value(access.read_thread_msr(msr::UNC_CBO_CONFIG, thread)?);

    access.write_layout(msr::UNC_PERF_GLOBAL_CTRL, &UncPerfGlobalCtrl { enable: true }, thread)?;
    access.write_layout(
        msr::UNC_PERF_FIXED_CTRL,
        &UncPerfFixedCtrl {
            enable: true,
            ..Default::default()
        },
        thread,
    )?;

    let banks = layout.bank_count(config);
    for bank in 0..banks {
        for (counter, event) in CboEvent::all().into_iter().enumerate() {
            let (event_select, umask) = event.selector();
            access.write_layout(
                layout.event_select(bank, counter),
                &CboPerfEvtSel::counting(event_select, umask),
                thread,
            )?;
            access.clear_counter(layout.counter(bank, counter), thread)?;
        }
    }
    Ok(banks)
}

#[derive(Debug)]
struct CboBank {
    tracks: [CounterTrack; 2],
    deltas: [Option<u64>; 2],
    hits: SensorHandle,
    lookups: SensorHandle,
    hit_rate: SensorHandle,
}

#[derive(Debug)]
pub struct UncoreMonitor {
    layout: CboxLayout,
    thread: u32,
    banks: Vec<CboBank>,
    clock: CounterTrack,
    hit_bandwidth: SensorHandle,
    hit_rate: SensorHandle,
    uncore_clock: SensorHandle,
}

impl UncoreMonitor {
    pub fn initialize<A: RegisterAccess, S: TelemetrySink>(
        layout: CboxLayout,
        thread: u32,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Option<Self> {
        let banks = program_uncore(access, layout, thread).or_warn("client uncore programming")?;
        tracing::info!("Client uncore: {banks} C-box banks");

        let banks = (0..banks)
            .map(|bank| {
                let counter = |i| CounterTrack::new(layout.counter(bank, i).width);
                CboBank {
                    tracks: [counter(HITS), counter(LOOKUPS)],
                    deltas: [None; 2],
                    hits: factory.create_active(sink, format!("CBo {bank} L3 Hits"), SensorKind::Counter),
                    lookups: factory.create_active(sink, format!("CBo {bank} L3 Lookups"), SensorKind::Counter),
                    hit_rate: factory.create_active(sink, format!("CBo {bank} L3 Hitrate"), SensorKind::CounterRatio),
                }
            })
            .collect();

        Some(Self {
            layout,
            thread,
            banks,
            clock: CounterTrack::new(msr::UNC_PERF_FIXED_CTR.width),
            hit_bandwidth: factory.create_active(sink, "Total CBo L3 Hit Bandwidth", SensorKind::Throughput),
            hit_rate: factory.create_active(sink, "Average L3 Hitrate", SensorKind::Level),
            uncore_clock: factory.create_active(sink, "Uncore Clock", SensorKind::Clock),
        })
    }

    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(&mut self, access: &A, sink: &mut S, tick: Tick) {
        if !tick.reads_counters() {
            return;
        }

        let thread = self.thread;
        for (bank, cbo) in (0u32..).zip(self.banks.iter_mut()) {
            for (i, track) in cbo.tracks.iter_mut().enumerate() {
                let counter = self.layout.counter(bank, i);
                cbo.deltas[i] = access
                    .read_counter(counter, thread)
                    .or_debug(format_args!("C-box {bank} counter {i}"))
                    .and_then(|value| track.update(value));
            }
        }
        let clocks = access
            .read_counter(msr::UNC_PERF_FIXED_CTR, thread)
            .or_debug("uncore fixed counter")
            .and_then(|value| self.clock.update(value));

        let Some(elapsed) = tick.elapsed() else {
            return;
        };
        let seconds = elapsed.as_secs_f64();

        let (mut hits, mut lookups) = (0u64, 0u64);
        for cbo in &self.banks {
            let [Some(bank_hits), Some(bank_lookups)] = cbo.deltas else {
                continue;
            };
            sink.set_value(cbo.hits, Some(bank_hits as f64 / GIGA));
            sink.set_value(cbo.lookups, Some(bank_lookups as f64 / GIGA));
            sink.set_value(cbo.hit_rate, Some(ratio(bank_hits as f64, bank_lookups as f64)));
            hits += bank_hits;
            lookups += bank_lookups;
        }

        if !self.banks.is_empty() {
            sink.set_value(self.hit_bandwidth, Some(throughput(hits, CACHE_LINE_BYTES, seconds)));
            sink.set_value(self.hit_rate, Some(percent_of(hits, lookups)));
        }
        if let Some(clocks) = clocks {
            sink.set_value(self.uncore_clock, Some(clocks as f64 / seconds / 1e6));
        }
    }
}
