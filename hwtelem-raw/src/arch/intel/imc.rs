//! Client integrated memory controller counters (Sandy Bridge and later)
//!
//! The client IMC exposes free-running 32-bit counters in a memory-mapped
//! region. Its base is read from PCI 0:0.0 and masked.

/// Cache line size for bandwidth calculations (64 bytes)
pub const CACHE_LINE_SIZE: u64 = 64;

/// Client DRAM counter offsets from the IMC BAR
pub mod mmio {
    use crate::register::{CounterRegister, CounterWidth};

    /// Cache lines read from DRAM
    pub const DRAM_DATA_READS: CounterRegister = CounterRegister::new(0x5050, CounterWidth::Bits32);

    /// Cache lines written to DRAM
    pub const DRAM_DATA_WRITES: CounterRegister = CounterRegister::new(0x5054, CounterWidth::Bits32);
}

/// PCI configuration offsets on bus 0, device 0, function 0
pub mod pci {
    /// MCHBAR low dword
    pub const MCHBAR_LOW: u32 = 0x48;
    /// MCHBAR high dword
    pub const MCHBAR_HIGH: u32 = 0x4C;
}

/// MCHBAR address bits
pub const BAR_MASK: u64 = 0x0007_FFFF_F800;

/// IMC base address assembled from the two MCHBAR halves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImcBar {
    pub base: u64,
}

impl ImcBar {
    pub fn from_halves(low: u32, high: u32) -> Self {
        Self {
            base: ((low as u64) | ((high as u64) << 32)) & BAR_MASK,
        }
    }

    /// Physical address of a counter inside the BAR
    pub fn counter_address(&self, offset: u32) -> u64 {
        self.base + offset as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_masks_enable_bit() {
        let bar = ImcBar::from_halves(0xFED1_0001, 0);
        assert_eq!(bar.base, 0xFED1_0000);
        assert_eq!(
            bar.counter_address(mmio::DRAM_DATA_READS.address),
            0xFED1_5050
        );
    }

    #[test]
    fn test_bar_high_bits_masked() {
        let bar = ImcBar::from_halves(0, 0xFFFF_FFFF);
        assert_eq!(bar.base, 0x0007_FFFF_0000_0000);
    }
}
