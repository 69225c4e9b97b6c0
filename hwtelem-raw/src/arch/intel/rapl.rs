//! RAPL (Running Average Power Limit) energy counters
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 14.10: Platform Specific Power Management Support

use crate::register::RegisterLayout;

/// RAPL energy domains in the order the counters are probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaplDomain {
    Package,
    Cores,
    Graphics,
    Memory,
}

impl RaplDomain {
    pub const ALL: [RaplDomain; 4] = [
        RaplDomain::Package,
        RaplDomain::Cores,
        RaplDomain::Graphics,
        RaplDomain::Memory,
    ];

    /// Energy status counter of this domain
    pub const fn energy_status(self) -> crate::register::CounterRegister {
        match self {
            RaplDomain::Package => msr::MSR_PKG_ENERGY_STATUS,
            RaplDomain::Cores => msr::MSR_PP0_ENERGY_STATUS,
            RaplDomain::Graphics => msr::MSR_PP1_ENERGY_STATUS,
            RaplDomain::Memory => msr::MSR_DRAM_ENERGY_STATUS,
        }
    }
}

/// MSR addresses for RAPL
pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// RAPL Power Unit MSR - Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u32 = 0x606;

    /// Package Energy Status
    pub const MSR_PKG_ENERGY_STATUS: CounterRegister = CounterRegister::new(0x611, CounterWidth::Bits32);

    /// PP0 Energy Status - cores
    pub const MSR_PP0_ENERGY_STATUS: CounterRegister = CounterRegister::new(0x639, CounterWidth::Bits32);

    /// PP1 Energy Status - integrated graphics
    pub const MSR_PP1_ENERGY_STATUS: CounterRegister = CounterRegister::new(0x641, CounterWidth::Bits32);

    /// DRAM Energy Status
    pub const MSR_DRAM_ENERGY_STATUS: CounterRegister = CounterRegister::new(0x619, CounterWidth::Bits32);
}

/// RAPL Power Unit Register layout
///
/// ## Register Format
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units                           |
/// | 8-12   | energy_units | Energy status units (ESU)             |
/// | 16-19  | time_units   | Time units                            |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaplPowerUnit {
    pub power_units: u8,
    pub energy_units: u8,
    pub time_units: u8,
}

impl RegisterLayout for RaplPowerUnit {
    fn to_msr_value(&self) -> u64 {
        (self.power_units as u64 & 0x0F)
            | ((self.energy_units as u64 & 0x1F) << 8)
            | ((self.time_units as u64 & 0x0F) << 16)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            power_units: (value & 0x0F) as u8,
            energy_units: ((value >> 8) & 0x1F) as u8,
            time_units: ((value >> 16) & 0x0F) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.power_units > 15 {
            return Err("Power units must be <= 15 (4 bits)");
        }
        if self.energy_units > 31 {
            return Err("Energy units must be <= 31 (5 bits)");
        }
        if self.time_units > 15 {
            return Err("Time units must be <= 15 (4 bits)");
        }
        Ok(())
    }
}

impl RaplPowerUnit {
    /// Joules per LSB as `1 / 2^ESU`
    pub fn energy_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.energy_units) as f64
    }

    /// Joules per LSB as `2^ESU` microjoules, the Silvermont and Airmont reading
    pub fn micro_energy_unit_multiplier(&self) -> f64 {
        1.0e-6 * (1u64 << self.energy_units) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapl_power_unit_round_trip() {
        let unit = RaplPowerUnit {
            power_units: 3,
            energy_units: 14,
            time_units: 10,
        };

        assert_eq!(RaplPowerUnit::from_msr_value(unit.to_msr_value()), unit);
        assert_eq!(unit.to_msr_value(), 0x000A_0E03);
    }

    #[test]
    fn test_energy_unit_rules() {
        let unit = RaplPowerUnit::from_msr_value(0x000A_0E03);
        assert_eq!(unit.energy_unit_multiplier(), 1.0 / 16384.0);

        let atom = RaplPowerUnit::from_msr_value(0x0005_0505);
        assert_eq!(atom.energy_units, 5);
        assert!((atom.micro_energy_unit_multiplier() - 32.0e-6).abs() < 1e-15);
    }

    #[test]
    fn test_domain_counters() {
        assert_eq!(RaplDomain::Package.energy_status().address, 0x611);
        assert_eq!(RaplDomain::Memory.energy_status().address, 0x619);
        assert!(RaplDomain::ALL
            .iter()
            .all(|d| d.energy_status().width == crate::register::CounterWidth::Bits32));
    }
}
