use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use hwtelem_raw::MsrDevice;

use crate::error::Result;

/// Process-wide pool of open `/dev/cpu/N/msr` devices
pub struct MsrPool {
    devices: RwLock<HashMap<u32, Arc<Mutex<MsrDevice>>>>,
}

impl MsrPool {
    fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static MsrPool {
        static INSTANCE: Lazy<MsrPool> = Lazy::new(MsrPool::new);
        &INSTANCE
    }

    fn device(&self, cpu: u32) -> Result<Arc<Mutex<MsrDevice>>> {
        {
            let devices = self.devices.read();
            if let Some(device) = devices.get(&cpu) {
                return Ok(Arc::clone(device));
            }
        }

        let mut devices = self.devices.write();
        if let Some(device) = devices.get(&cpu) {
            return Ok(Arc::clone(device));
        }

        let device = Arc::new(Mutex::new(MsrDevice::open(cpu)?));
        tracing::debug!("Opened MSR device for CPU {cpu}");
        devices.insert(cpu, Arc::clone(&device));
        Ok(device)
    }

    pub fn read(&self, cpu: u32, msr: u32) -> Result<u64> {
        let value = self.device(cpu)?.lock().read(msr)?;
        tracing::trace!("MSR read: CPU {cpu} MSR {msr:#010x} = {value:#018x}");
        Ok(value)
    }

    pub fn write(&self, cpu: u32, msr: u32, value: u64) -> Result<()> {
        tracing::trace!("MSR write: CPU {cpu} MSR {msr:#010x} = {value:#018x}");
        self.device(cpu)?.lock().write(msr, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_singleton() {
        assert!(std::ptr::eq(MsrPool::instance(), MsrPool::instance()));
    }

    #[test]
    fn test_missing_device_is_an_error() {
        assert!(MsrPool::instance().read(u32::MAX, 0x10).is_err());
    }
}
