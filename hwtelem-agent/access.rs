//! Register-access contract between the telemetry engine and the platform
//!
//! Every register operation is addressed at a [`ThreadMask`]. Implementations
//! decide how the mask is honoured: the Linux adapter opens the per-CPU MSR
//! device of the first thread in the mask, a privileged driver would pin the
//! calling thread. [`AffinityScope`] covers sequences of operations that must
//! run while pinned and restores the previous mask on every exit path.

use std::fmt;

use hwtelem_raw::{CounterRegister, RegisterLayout, RegisterValue};

use crate::error::{HwtelemError, Result};

/// Set of logical threads a register operation targets
///
/// Backed by 64-bit words grown on demand, so any thread id the kernel can
/// report fits. Trailing zero words are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ThreadMask {
    words: Vec<u64>,
}

impl ThreadMask {
    /// Mask selecting exactly one logical thread
    pub fn for_thread(thread: u32) -> Self {
        let mut mask = Self::default();
        mask.insert(thread);
        mask
    }

    pub fn from_threads(threads: impl IntoIterator<Item = u32>) -> Self {
        let mut mask = Self::default();
        for thread in threads {
            mask.insert(thread);
        }
        mask
    }

    pub fn insert(&mut self, thread: u32) {
        let word = (thread / 64) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (thread % 64);
    }

    pub fn contains(&self, thread: u32) -> bool {
        self.words
            .get((thread / 64) as usize)
            .is_some_and(|word| word & (1u64 << (thread % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Lowest thread selected by the mask
    pub fn first_thread(&self) -> Option<u32> {
        self.threads().next()
    }

    pub fn threads(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64u32)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i as u32 * 64 + bit)
        })
    }
}

impl fmt::Display for ThreadMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let threads: Vec<String> = self.threads().map(|t| t.to_string()).collect();
        write!(f, "{{{}}}", threads.join(","))
    }
}

/// PCI function address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }
}

/// Fixed-size value readable from physical memory
pub trait PhysicalValue: Sized + Copy {
    const SIZE: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
}

impl PhysicalValue for u32 {
    const SIZE: usize = 4;

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        u32::from_le_bytes(raw)
    }
}

impl PhysicalValue for u64 {
    const SIZE: usize = 8;

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(raw)
    }
}

/// Privileged register transport
pub trait RegisterAccess {
    fn read_msr(&self, msr: u32, mask: &ThreadMask) -> Result<u64>;

    /// Write a layout-produced value; raw integers cannot reach hardware
    fn write_msr(&self, msr: u32, value: RegisterValue, mask: &ThreadMask) -> Result<()>;

    fn read_pci_config(&self, address: PciAddress, offset: u32) -> Result<u32>;

    fn write_pci_config(&self, address: PciAddress, offset: u32, value: u32) -> Result<()>;

    fn pci_address(&self, bus: u8, device: u8, function: u8) -> PciAddress {
        PciAddress::new(bus, device, function)
    }

    /// Fill `buf` from physical memory starting at `address`
    fn read_physical(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Switch the calling thread to `mask`, returning the previous mask
    fn set_thread_affinity(&self, mask: &ThreadMask) -> Result<ThreadMask>;
}

/// Conveniences shared by every [`RegisterAccess`] implementation
pub trait RegisterAccessExt: RegisterAccess {
    fn read_thread_msr(&self, msr: u32, thread: u32) -> Result<u64> {
        self.read_msr(msr, &ThreadMask::for_thread(thread))
    }

    fn read_counter(&self, counter: CounterRegister, thread: u32) -> Result<u64> {
        self.read_thread_msr(counter.address, thread)
    }

    fn write_layout<L: RegisterLayout>(&self, msr: u32, layout: &L, thread: u32) -> Result<()> {
        layout.validate().map_err(|e| {
            HwtelemError::MsrError(format!("Refusing to program MSR {msr:#x}: {e}"))
        })?;
        self.write_msr(msr, layout.to_register_value(), &ThreadMask::for_thread(thread))
    }

    fn clear_counter(&self, counter: CounterRegister, thread: u32) -> Result<()> {
        self.write_msr(
            counter.address,
            RegisterValue::ZERO,
            &ThreadMask::for_thread(thread),
        )
    }

    fn read_physical_memory<T: PhysicalValue>(&self, address: u64) -> Result<T> {
        let mut buf = [0u8; 8];
        self.read_physical(address, &mut buf[..T::SIZE])?;
        Ok(T::from_le_slice(&buf[..T::SIZE]))
    }
}

impl<A: RegisterAccess + ?Sized> RegisterAccessExt for A {}

/// Pins the calling thread for the lifetime of the guard
pub struct AffinityScope<'a, A: RegisterAccess + ?Sized> {
    access: &'a A,
    previous: ThreadMask,
}

impl<'a, A: RegisterAccess + ?Sized> AffinityScope<'a, A> {
    pub fn enter(access: &'a A, thread: u32) -> Result<Self> {
        let previous = access.set_thread_affinity(&ThreadMask::for_thread(thread))?;
        Ok(Self { access, previous })
    }
}

impl<A: RegisterAccess + ?Sized> Drop for AffinityScope<'_, A> {
    fn drop(&mut self) {
        if let Err(e) = self.access.set_thread_affinity(&self.previous) {
            tracing::warn!("Failed to restore affinity mask {}: {}", self.previous, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAccess;

    #[test]
    fn test_thread_mask() {
        let mask = ThreadMask::for_thread(5);
        assert_eq!(mask.first_thread(), Some(5));
        assert!(mask.contains(5));
        assert!(!mask.contains(4));
        assert_eq!(ThreadMask::default().first_thread(), None);
        assert!(ThreadMask::default().is_empty());
        assert_eq!(
            ThreadMask::from_threads([3, 1]).threads().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(ThreadMask::from_threads([1, 3]).to_string(), "{1,3}");
    }

    #[test]
    fn test_thread_mask_beyond_one_word() {
        for thread in [63, 64, 127, 200] {
            let mask = ThreadMask::for_thread(thread);
            assert_eq!(mask.first_thread(), Some(thread));
            assert_eq!(mask.threads().count(), 1);
        }
        let mask = ThreadMask::from_threads([130, 2, 64]);
        assert_eq!(mask.threads().collect::<Vec<_>>(), vec![2, 64, 130]);
        assert_eq!(mask, ThreadMask::from_threads([2, 64, 130]));
    }

    #[test]
    fn test_affinity_scope_restores_on_error() {
        let access = FakeAccess::new();
        let all = ThreadMask::from_threads(0..8);
        access.set_affinity(all.clone());
        access.fail_msr(0x10);

        let read = || -> Result<u64> {
            let _scope = AffinityScope::enter(&access, 3)?;
            assert_eq!(access.affinity(), ThreadMask::for_thread(3));
            access.read_thread_msr(0x10, 3)
        };

        assert!(read().is_err());
        assert_eq!(access.affinity(), all);
    }

    #[test]
    fn test_affinity_scope_restores_high_threads() {
        let access = FakeAccess::new();
        let high = ThreadMask::from_threads([64, 65, 127]);
        access.set_affinity(high.clone());
        {
            let _scope = AffinityScope::enter(&access, 100).unwrap();
            assert_eq!(access.affinity(), ThreadMask::for_thread(100));
        }
        assert_eq!(access.affinity(), high);
    }

    #[test]
    fn test_affinity_scope_nested() {
        let access = FakeAccess::new();
        access.set_affinity(ThreadMask::from_threads([0, 1]));
        {
            let _outer = AffinityScope::enter(&access, 0).unwrap();
            {
                let _inner = AffinityScope::enter(&access, 1).unwrap();
                assert_eq!(access.affinity(), ThreadMask::for_thread(1));
            }
            assert_eq!(access.affinity(), ThreadMask::for_thread(0));
        }
        assert_eq!(access.affinity(), ThreadMask::from_threads([0, 1]));
    }

    #[test]
    fn test_read_physical_memory() {
        let access = FakeAccess::new();
        access.set_physical(0x1000, 0xDEAD_BEEF);
        assert_eq!(
            access.read_physical_memory::<u32>(0x1000).unwrap(),
            0xDEAD_BEEF
        );
        assert!(access.read_physical_memory::<u32>(0x2000).is_err());
    }

    #[test]
    fn test_write_layout_targets_thread() {
        use hwtelem_raw::arch::amd::perf::PerfCtl;

        let access = FakeAccess::new();
        access
            .write_layout(0xC001_0200, &PerfCtl::counting(0x40, 0x00), 2)
            .unwrap();
        assert_eq!(access.writes(), vec![(2, 0xC001_0200, 0x0043_0040)]);
    }
}
