//! Wraparound-safe counter deltas and interval bookkeeping

use std::time::{Duration, Instant};

use hwtelem_raw::CounterWidth;

/// Intervals shorter than this are noise: rates are not updated and energy
/// snapshots are not advanced
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Delta between two readings of a free-running counter of `width` bits
///
/// Both readings are masked to the width first, so stray high bits from the
/// transport can never produce a negative or oversized delta.
pub fn counter_delta(previous: u64, current: u64, width: CounterWidth) -> u64 {
    let max = width.max_value();
    let (previous, current) = (previous & max, current & max);
    if current >= previous {
        current - previous
    } else {
        (max - previous) + current
    }
}

/// Last snapshot of one counter
#[derive(Debug, Clone, Copy)]
pub struct CounterTrack {
    width: CounterWidth,
    last: Option<u64>,
}

impl CounterTrack {
    pub const fn new(width: CounterWidth) -> Self {
        Self { width, last: None }
    }

    /// Record `current`, returning the delta since the previous snapshot
    ///
    /// The first observation only primes the track.
    pub fn update(&mut self, current: u64) -> Option<u64> {
        let delta = self
            .last
            .map(|previous| counter_delta(previous, current, self.width));
        self.last = Some(current);
        delta
    }

    pub fn width(&self) -> CounterWidth {
        self.width
    }
}

/// Energy consumed over an interval, in raw counter units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyInterval {
    pub delta: u64,
    pub elapsed: Duration,
}

/// Last energy value and the time it was taken
#[derive(Debug, Clone, Copy)]
pub struct EnergyTracker {
    width: CounterWidth,
    last: Option<(u64, Instant)>,
}

impl EnergyTracker {
    pub const fn new(width: CounterWidth) -> Self {
        Self { width, last: None }
    }

    pub fn primed(width: CounterWidth, value: u64, at: Instant) -> Self {
        Self {
            width,
            last: Some((value, at)),
        }
    }

    /// Advance to `value` read at `now`
    ///
    /// Returns `None` on the first reading and when less than
    /// [`MIN_INTERVAL`] has passed; in the latter case the snapshot is kept.
    pub fn advance(&mut self, value: u64, now: Instant) -> Option<EnergyInterval> {
        let Some((previous, at)) = self.last else {
            self.last = Some((value, now));
            return None;
        };

        let elapsed = now.saturating_duration_since(at);
        if elapsed < MIN_INTERVAL {
            return None;
        }

        self.last = Some((value, now));
        Some(EnergyInterval {
            delta: counter_delta(previous, value, self.width),
            elapsed,
        })
    }
}

/// What a sampling pass may do with counter registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// First pass: read counters to take snapshots, publish nothing
    Priming,
    /// Too close to the previous pass: leave counters alone
    TooSoon,
    /// Full pass over this interval
    Elapsed(Duration),
}

impl Tick {
    pub fn reads_counters(self) -> bool {
        !matches!(self, Tick::TooSoon)
    }

    pub fn elapsed(self) -> Option<Duration> {
        match self {
            Tick::Elapsed(elapsed) => Some(elapsed),
            _ => None,
        }
    }
}

/// Time of the last counter pass
#[derive(Debug, Default)]
pub struct IntervalClock {
    last: Option<Instant>,
}

impl IntervalClock {
    pub fn tick(&mut self, now: Instant) -> Tick {
        match self.last {
            None => {
                self.last = Some(now);
                Tick::Priming
            }
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < MIN_INTERVAL {
                    Tick::TooSoon
                } else {
                    self.last = Some(now);
                    Tick::Elapsed(elapsed)
                }
            }
        }
    }
}
