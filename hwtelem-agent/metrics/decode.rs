//! Raw field to physical unit conversions

use std::time::Duration;

use hwtelem_raw::arch::amd::smu::{TCTL_RANGE_OFFSET, TCTL_STEP};

use crate::metrics::ratio::ratio;

/// `ceiling - slope * distance`, shifted by the range offset when flagged
pub fn temperature(ceiling: f64, slope: f64, distance: u32, range_offset: bool) -> f64 {
    let t = ceiling - slope * distance as f64;
    if range_offset {
        t + TCTL_RANGE_OFFSET
    } else {
        t
    }
}

/// Control temperature reported by the SMU in 1/8 °C steps
pub fn control_temperature(raw: u16, range_offset: bool) -> f64 {
    let t = raw as f64 * TCTL_STEP;
    if range_offset {
        t + TCTL_RANGE_OFFSET
    } else {
        t
    }
}

/// SVI2 voltage code, 6.25 mV steps down from 1.55 V
pub fn svi_voltage(code: u8) -> f64 {
    1.550 - 0.00625 * code as f64
}

/// Watts from an energy delta
pub fn power(delta: u64, energy_unit: f64, elapsed: Duration) -> f64 {
    ratio(delta as f64 * energy_unit, elapsed.as_secs_f64())
}

/// `multiplier * reference_clock / divisor`
pub fn clock(multiplier: f64, reference_clock: f64, divisor: f64) -> f64 {
    multiplier * ratio(reference_clock, divisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::delta::EnergyTracker;
    use hwtelem_raw::CounterWidth;
    use std::time::Instant;

    #[test]
    fn test_temperature() {
        assert_eq!(temperature(90.0, 1.0, 40, false), 50.0);
        assert_eq!(temperature(90.0, 1.0, 40, true), 1.0);
        assert_eq!(temperature(100.0, 1.0, 50, false), 50.0);
        assert_eq!(temperature(100.0, 1.0, 50, true), 1.0);
        assert_eq!(temperature(90.0, 2.0, 10, false), 70.0);
    }

    #[test]
    fn test_control_temperature() {
        assert_eq!(control_temperature(400, false), 50.0);
        assert_eq!(control_temperature(400, true), 1.0);
    }

    #[test]
    fn test_svi_voltage() {
        assert_eq!(svi_voltage(0), 1.55);
        assert!((svi_voltage(0x40) - 1.15).abs() < 1e-12);
    }

    #[test]
    fn test_power_across_wrap() {
        let t0 = Instant::now();
        let mut tracker = EnergyTracker::primed(CounterWidth::Bits32, 0xFFFF_FFF0, t0);
        let interval = tracker.advance(5, t0 + Duration::from_secs(1)).unwrap();

        // (0xFFFFFFFF - 0xFFFFFFF0) + 5
        assert_eq!(interval.delta, 20);
        assert_eq!(power(interval.delta, 1.0, interval.elapsed), 20.0);
        assert!(power(1, 1.0, Duration::ZERO).is_nan());
    }

    #[test]
    fn test_clock() {
        // Zen: fid 0x90, dfs 8 -> multiplier 36 at a 100 MHz reference
        assert_eq!(clock(36.0, 100.0, 1.0), 3600.0);
        // bus clock from TSC: 4000 MHz / ratio 40
        assert_eq!(clock(1.0, 4000.0, 40.0), 100.0);
        assert!(clock(36.0, 100.0, 0.0).is_nan());
    }
}
