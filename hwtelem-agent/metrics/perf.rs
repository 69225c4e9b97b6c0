//! Per-thread counter state

use std::collections::BTreeMap;

use hwtelem_raw::CounterRegister;

use crate::metrics::delta::CounterTrack;

/// Snapshots and latest deltas of one thread's counters
///
/// `S` holds the sensors the owning backend publishes for the thread.
#[derive(Debug)]
pub struct ThreadPerformanceData<S> {
    tracks: Vec<CounterTrack>,
    deltas: Vec<Option<u64>>,
    pub sensors: S,
}

impl<S> ThreadPerformanceData<S> {
    pub fn new(counters: &[CounterRegister], sensors: S) -> Self {
        Self {
            tracks: counters.iter().map(|c| CounterTrack::new(c.width)).collect(),
            deltas: vec![None; counters.len()],
            sensors,
        }
    }

    /// Feed a raw reading of counter `slot`; a failed read clears the delta
    /// for this interval but keeps the snapshot
    pub fn observe(&mut self, slot: usize, reading: Option<u64>) {
        self.deltas[slot] = match reading {
            Some(value) => self.tracks[slot].update(value),
            None => None,
        };
    }

    pub fn delta(&self, slot: usize) -> Option<u64> {
        self.deltas[slot]
    }

    /// Deltas of several slots, only when all are present
    pub fn deltas<const N: usize>(&self, slots: [usize; N]) -> Option<[u64; N]> {
        let mut out = [0u64; N];
        for (o, slot) in out.iter_mut().zip(slots) {
            *o = self.deltas[slot]?;
        }
        Some(out)
    }
}

/// Thread id → performance data, owned by one engine
#[derive(Debug)]
pub struct PerfContext<S> {
    threads: BTreeMap<u32, ThreadPerformanceData<S>>,
}

impl<S> Default for PerfContext<S> {
    fn default() -> Self {
        Self {
            threads: BTreeMap::new(),
        }
    }
}

impl<S> PerfContext<S> {
    pub fn get_or_insert_with(
        &mut self,
        thread: u32,
        create: impl FnOnce() -> ThreadPerformanceData<S>,
    ) -> &mut ThreadPerformanceData<S> {
        self.threads.entry(thread).or_insert_with(create)
    }

    pub fn get_mut(&mut self, thread: u32) -> Option<&mut ThreadPerformanceData<S>> {
        self.threads.get_mut(&thread)
    }

    pub fn contains(&self, thread: u32) -> bool {
        self.threads.contains_key(&thread)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ThreadPerformanceData<S>)> {
        self.threads.iter().map(|(&t, d)| (t, d))
    }

    /// Sum of the latest deltas of `slot` over threads that produced one
    pub fn sum(&self, slot: usize) -> u64 {
        self.threads.values().filter_map(|d| d.delta(slot)).sum()
    }
}
