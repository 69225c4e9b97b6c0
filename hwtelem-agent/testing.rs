//! In-memory register access for unit tests
//!
//! Unset MSRs, PCI registers and SMN addresses read as zero. Unmapped
//! physical memory and MSRs marked with [`FakeAccess::fail_msr`] fail.

use std::collections::{HashMap, HashSet};

use hwtelem_raw::arch::amd::smu::{SMN_DATA, SMN_INDEX};
use hwtelem_raw::RegisterValue;
use parking_lot::Mutex;

use crate::access::{PciAddress, RegisterAccess, ThreadMask};
use crate::error::{HwtelemError, Result};
use crate::topology::{IdentificationFlags, IdentificationRecord, Vendor};

#[derive(Default)]
pub(crate) struct FakeAccess {
    msrs: Mutex<HashMap<(u32, u32), u64>>,
    failing_msrs: Mutex<HashSet<u32>>,
    pci: Mutex<HashMap<(PciAddress, u32), u32>>,
    smn: Mutex<HashMap<u32, u32>>,
    failing_smn: Mutex<HashSet<u32>>,
    smn_index: Mutex<u32>,
    physical: Mutex<HashMap<u64, u32>>,
    writes: Mutex<Vec<(u32, u32, u64)>>,
    affinity: Mutex<ThreadMask>,
    affinity_changes: Mutex<usize>,
}

impl FakeAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_msr(&self, thread: u32, msr: u32, value: u64) {
        self.msrs.lock().insert((thread, msr), value);
    }

    pub fn msr(&self, thread: u32, msr: u32) -> u64 {
        self.msrs.lock().get(&(thread, msr)).copied().unwrap_or(0)
    }

    pub fn fail_msr(&self, msr: u32) {
        self.failing_msrs.lock().insert(msr);
    }

    pub fn heal_msr(&self, msr: u32) {
        self.failing_msrs.lock().remove(&msr);
    }

    pub fn set_pci(&self, address: PciAddress, offset: u32, value: u32) {
        self.pci.lock().insert((address, offset), value);
    }

    pub fn set_smn(&self, address: u32, value: u32) {
        self.smn.lock().insert(address, value);
    }

    pub fn fail_smn(&self, address: u32) {
        self.failing_smn.lock().insert(address);
    }

    pub fn set_physical(&self, address: u64, value: u32) {
        self.physical.lock().insert(address, value);
    }

    /// Every MSR write as (thread, msr, value), in issue order
    pub fn writes(&self) -> Vec<(u32, u32, u64)> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    pub fn set_affinity(&self, mask: ThreadMask) {
        *self.affinity.lock() = mask;
    }

    pub fn affinity(&self) -> ThreadMask {
        self.affinity.lock().clone()
    }

    pub fn affinity_changes(&self) -> usize {
        *self.affinity_changes.lock()
    }

    fn target(mask: &ThreadMask) -> Result<u32> {
        mask.first_thread()
            .ok_or_else(|| HwtelemError::AffinityError("empty thread mask".to_string()))
    }
}

impl RegisterAccess for FakeAccess {
    fn read_msr(&self, msr: u32, mask: &ThreadMask) -> Result<u64> {
        let thread = Self::target(mask)?;
        if self.failing_msrs.lock().contains(&msr) {
            return Err(HwtelemError::MsrError(format!(
                "read of {msr:#x} on thread {thread} failed"
            )));
        }
        Ok(self.msr(thread, msr))
    }

    fn write_msr(&self, msr: u32, value: RegisterValue, mask: &ThreadMask) -> Result<()> {
        let thread = Self::target(mask)?;
        if self.failing_msrs.lock().contains(&msr) {
            return Err(HwtelemError::MsrError(format!(
                "write of {msr:#x} on thread {thread} failed"
            )));
        }
        self.writes.lock().push((thread, msr, value.bits()));
        self.set_msr(thread, msr, value.bits());
        Ok(())
    }

    fn read_pci_config(&self, address: PciAddress, offset: u32) -> Result<u32> {
        if offset == SMN_DATA {
            let index = *self.smn_index.lock();
            if self.failing_smn.lock().contains(&index) {
                return Err(HwtelemError::PciError(format!("SMN read of {index:#x} failed")));
            }
            return Ok(self.smn.lock().get(&index).copied().unwrap_or(0));
        }
        Ok(self.pci.lock().get(&(address, offset)).copied().unwrap_or(0))
    }

    fn write_pci_config(&self, address: PciAddress, offset: u32, value: u32) -> Result<()> {
        if offset == SMN_INDEX {
            *self.smn_index.lock() = value;
        } else {
            self.pci.lock().insert((address, offset), value);
        }
        Ok(())
    }

    fn read_physical(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let physical = self.physical.lock();
        match (buf.len(), physical.get(&address)) {
            (4, Some(value)) => {
                buf.copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            _ => Err(HwtelemError::PhysicalMemoryError(format!(
                "{address:#x} is not mapped"
            ))),
        }
    }

    fn set_thread_affinity(&self, mask: &ThreadMask) -> Result<ThreadMask> {
        *self.affinity_changes.lock() += 1;
        Ok(std::mem::replace(&mut *self.affinity.lock(), mask.clone()))
    }
}

/// Family 17h records, `threads_per_core` siblings numbered consecutively
pub(crate) fn amd_records(
    model: u32,
    brand: &str,
    cores: u32,
    threads_per_core: u32,
) -> Vec<IdentificationRecord> {
    (0..cores * threads_per_core)
        .map(|thread| IdentificationRecord {
            thread,
            vendor: Vendor::Amd,
            family: 0x17,
            model,
            stepping: 1,
            brand: brand.to_string(),
            node_id: 0,
            core_id: thread / threads_per_core,
            flags: IdentificationFlags {
                thermal_sensor: false,
                package_thermal_sensor: false,
                time_stamp_counter: true,
            },
        })
        .collect()
}

/// Family 6 records with siblings numbered after all first threads, the
/// way Linux enumerates Intel parts
pub(crate) fn intel_records(
    model: u32,
    stepping: u32,
    cores: u32,
    threads_per_core: u32,
) -> Vec<IdentificationRecord> {
    (0..cores * threads_per_core)
        .map(|thread| IdentificationRecord {
            thread,
            vendor: Vendor::Intel,
            family: 0x06,
            model,
            stepping,
            brand: "Intel(R) Core(TM) i7-6700K CPU @ 4.00GHz".to_string(),
            node_id: 0,
            core_id: (thread % cores) * 2,
            flags: IdentificationFlags {
                thermal_sensor: true,
                package_thermal_sensor: true,
                time_stamp_counter: true,
            },
        })
        .collect()
}
