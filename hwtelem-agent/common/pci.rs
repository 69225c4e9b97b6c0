use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::access::PciAddress;
use crate::error::{HwtelemError, Result};

const PROC_BUS_PCI: &str = "/proc/bus/pci";

/// Configuration-space file of one PCI function in segment 0
pub fn config_path(address: PciAddress) -> PathBuf {
    PathBuf::from(format!(
        "{PROC_BUS_PCI}/{:02x}/{:02x}.{}",
        address.bus, address.device, address.function
    ))
}

pub struct PciHandle {
    file: Mutex<File>,
    address: PciAddress,
}

impl PciHandle {
    pub fn new(address: PciAddress) -> Result<Self> {
        let path = config_path(address);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                HwtelemError::PciError(format!("Failed to open {}: {e}", path.display()))
            })?;

        Ok(Self {
            file: Mutex::new(file),
            address,
        })
    }

    pub fn read32(&self, offset: u32) -> Result<u32> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| self.error("seek to", offset, e))?;

        let mut buffer = [0u8; 4];
        file.read_exact(&mut buffer)
            .map_err(|e| self.error("read", offset, e))?;

        Ok(u32::from_le_bytes(buffer))
    }

    pub fn write32(&self, offset: u32, value: u32) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| self.error("seek to", offset, e))?;
        file.write_all(&value.to_le_bytes())
            .map_err(|e| self.error("write", offset, e))?;
        Ok(())
    }

    fn error(&self, what: &str, offset: u32, e: std::io::Error) -> HwtelemError {
        let a = self.address;
        HwtelemError::PciError(format!(
            "Failed to {what} offset {offset:#x} of {:02x}:{:02x}.{}: {e}",
            a.bus, a.device, a.function
        ))
    }
}

/// Process-wide pool of open configuration-space files
pub struct Pci {
    handles: RwLock<HashMap<PciAddress, Arc<PciHandle>>>,
}

impl Pci {
    fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static Pci {
        static INSTANCE: Lazy<Pci> = Lazy::new(Pci::new);
        &INSTANCE
    }

    fn handle(&self, address: PciAddress) -> Result<Arc<PciHandle>> {
        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&address) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&address) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(PciHandle::new(address)?);
        handles.insert(address, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn read32(&self, address: PciAddress, offset: u32) -> Result<u32> {
        self.handle(address)?.read32(offset)
    }

    pub fn write32(&self, address: PciAddress, offset: u32, value: u32) -> Result<()> {
        self.handle(address)?.write32(offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        assert_eq!(
            config_path(PciAddress::new(0, 0x18, 3)),
            PathBuf::from("/proc/bus/pci/00/18.3")
        );
        assert_eq!(
            config_path(PciAddress::new(0x3a, 5, 0)),
            PathBuf::from("/proc/bus/pci/3a/05.0")
        );
    }
}
