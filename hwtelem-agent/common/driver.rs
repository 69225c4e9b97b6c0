//! Linux implementation of the register-access contract

use hwtelem_raw::RegisterValue;

use crate::access::{PciAddress, RegisterAccess, ThreadMask};
use crate::common::{affinity, msr::MsrPool, pci::Pci, physmem};
use crate::error::{HwtelemError, Result};

/// Register access through `/dev/cpu/*/msr`, `/proc/bus/pci` and `/dev/mem`
///
/// MSR operations go to the device of the first thread in the mask.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxRegisterAccess;

impl LinuxRegisterAccess {
    pub fn new() -> Self {
        Self
    }

    fn target(mask: &ThreadMask) -> Result<u32> {
        mask.first_thread()
            .ok_or_else(|| HwtelemError::MsrError("Empty thread mask".to_string()))
    }
}

impl RegisterAccess for LinuxRegisterAccess {
    fn read_msr(&self, msr: u32, mask: &ThreadMask) -> Result<u64> {
        MsrPool::instance().read(Self::target(mask)?, msr)
    }

    fn write_msr(&self, msr: u32, value: RegisterValue, mask: &ThreadMask) -> Result<()> {
        MsrPool::instance().write(Self::target(mask)?, msr, value.bits())
    }

    fn read_pci_config(&self, address: PciAddress, offset: u32) -> Result<u32> {
        Pci::instance().read32(address, offset)
    }

    fn write_pci_config(&self, address: PciAddress, offset: u32, value: u32) -> Result<()> {
        Pci::instance().write32(address, offset, value)
    }

    fn read_physical(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        physmem::read(address, buf)
    }

    fn set_thread_affinity(&self, mask: &ThreadMask) -> Result<ThreadMask> {
        affinity::swap_affinity(mask)
    }
}
