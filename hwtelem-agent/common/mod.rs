//! Linux adapters: MSR devices, PCI configuration space, physical memory,
//! CPU affinity and identification

pub mod affinity;
pub mod cpuid;
pub mod driver;
pub mod msr;
pub mod pci;
pub mod physmem;

pub use cpuid::identify_online_threads;
pub use driver::LinuxRegisterAccess;
pub use msr::MsrPool;
