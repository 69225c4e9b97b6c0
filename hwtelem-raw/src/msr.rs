//! MSR (Model-Specific Register) device primitive
//!
//! Wraps one open `/dev/cpu/N/msr` file. Pooling and affinity live in
//! hwtelem-agent.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Failed to seek to MSR 0x{msr:X} on CPU {cpu}: {source}")]
    SeekFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },
}

/// An open MSR character device for one logical CPU
#[derive(Debug)]
pub struct MsrDevice {
    file: File,
    cpu: u32,
}

impl MsrDevice {
    /// Open `/dev/cpu/{cpu}/msr` for reading and synchronous writing
    ///
    /// Requires root or `CAP_SYS_RAWIO` and the `msr` kernel module.
    pub fn open(cpu: u32) -> Result<Self> {
        let path = format!("/dev/cpu/{cpu}/msr");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| MsrError::OpenFailed { cpu, source })?;
        Ok(Self { file, cpu })
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn read(&mut self, msr: u32) -> Result<u64> {
        let cpu = self.cpu;
        self.file
            .seek(SeekFrom::Start(msr as u64))
            .map_err(|source| MsrError::SeekFailed { cpu, msr, source })?;

        let mut buffer = [0u8; 8];
        self.file
            .read_exact(&mut buffer)
            .map_err(|source| MsrError::ReadFailed { cpu, msr, source })?;

        Ok(u64::from_le_bytes(buffer))
    }

    /// Write raw bits to an MSR
    ///
    /// Writing incorrect values can destabilize the machine; callers pass
    /// bits obtained from a [`crate::RegisterValue`].
    pub fn write(&mut self, msr: u32, value: u64) -> Result<()> {
        let cpu = self.cpu;
        self.file
            .seek(SeekFrom::Start(msr as u64))
            .map_err(|source| MsrError::SeekFailed { cpu, msr, source })?;

        self.file
            .write_all(&value.to_le_bytes())
            .map_err(|source| MsrError::WriteFailed { cpu, msr, source })?;

        Ok(())
    }
}
