//! Memory-Mapped Device Memory
//!
//! Arena memory device di-mmap langsung ke virtual memory:
//! - Anonymous: murni di RAM, untuk loopback device
//! - File-backed: isi memory device tersimpan ke disk (bisa di-inspect)
//!
//! Address device dimulai dari `DEVICE_BASE` supaya address 0 tetap null.

use memmap2::{MmapMut, MmapOptions};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use crate::protocol::Address;

/// Address device pertama yang bisa dialokasikan
pub const DEVICE_BASE: Address = 0x1_0000;

/// Arena memory device dengan first-fit allocator
pub struct DeviceMemory {
    mmap: MmapMut,
    capacity: u64,
    /// base address -> size, untuk semua alokasi yang masih hidup
    allocations: BTreeMap<Address, u64>,
}

impl DeviceMemory {
    /// Arena anonymous (tidak ada file)
    pub fn anonymous(capacity: usize) -> io::Result<Self> {
        check_capacity(capacity)?;
        let mmap = MmapOptions::new().len(capacity).map_anon()?;
        Ok(Self::from_mmap(mmap, capacity))
    }

    /// Membuat atau membuka arena file-backed
    ///
    /// # Arguments
    /// * `path` - Path ke file backing
    /// * `capacity` - Kapasitas dalam bytes
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> io::Result<Self> {
        check_capacity(capacity)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.set_len(capacity as u64)?;

        // SAFETY: File dibuka read/write dan panjangnya sudah di-set ke capacity.
        // File tidak boleh di-truncate proses lain selama mapping hidup.
        let mmap = unsafe { MmapOptions::new().len(capacity).map_mut(&file)? };

        Ok(Self::from_mmap(mmap, capacity))
    }

    fn from_mmap(mmap: MmapMut, capacity: usize) -> Self {
        Self {
            mmap,
            capacity: capacity as u64,
            allocations: BTreeMap::new(),
        }
    }

    /// Total bytes arena
    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Jumlah alokasi yang masih hidup
    #[inline(always)]
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Alokasi `size` bytes dengan alignment power-of-two (0 berarti 1)
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<Address> {
        let alignment = alignment.max(1);
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        let end_of_arena = DEVICE_BASE.checked_add(self.capacity)?;
        let mut cursor = DEVICE_BASE;

        // First-fit: cari gap pertama di antara alokasi yang cukup besar
        for (&start, &len) in &self.allocations {
            let candidate = align_up(cursor, alignment)?;
            if candidate.checked_add(size)? <= start {
                self.allocations.insert(candidate, size);
                return Some(candidate);
            }
            cursor = start + len;
        }

        let candidate = align_up(cursor, alignment)?;
        if candidate.checked_add(size)? > end_of_arena {
            return None;
        }
        self.allocations.insert(candidate, size);
        Some(candidate)
    }

    /// Free alokasi. Hanya base address yang valid.
    pub fn free(&mut self, address: Address) -> bool {
        self.allocations.remove(&address).is_some()
    }

    /// Free semua alokasi
    pub fn clear(&mut self) {
        self.allocations.clear();
    }

    /// Offset arena untuk range `[address, address + len)` jika range
    /// tersebut sepenuhnya di dalam satu alokasi hidup.
    fn resolve(&self, address: Address, len: u64) -> Option<usize> {
        let (&start, &size) = self.allocations.range(..=address).next_back()?;
        let alloc_end = start + size;
        let end = address.checked_add(len)?;

        if address >= alloc_end || end > alloc_end {
            return None;
        }
        usize::try_from(address - DEVICE_BASE).ok()
    }

    /// View read-only ke memory device (zero-copy)
    pub fn slice(&self, address: Address, len: u64) -> Option<&[u8]> {
        let offset = self.resolve(address, len)?;
        let len = usize::try_from(len).ok()?;
        Some(&self.mmap[offset..offset + len])
    }

    /// View mutable ke memory device
    pub fn slice_mut(&mut self, address: Address, len: u64) -> Option<&mut [u8]> {
        let offset = self.resolve(address, len)?;
        let len = usize::try_from(len).ok()?;
        Some(&mut self.mmap[offset..offset + len])
    }

    /// Copy antar range device, boleh overlap
    pub fn copy(&mut self, dst: Address, src: Address, len: u64) -> bool {
        let (Some(dst_off), Some(src_off)) = (self.resolve(dst, len), self.resolve(src, len)) else {
            return false;
        };
        let Ok(len) = usize::try_from(len) else {
            return false;
        };

        self.mmap.copy_within(src_off..src_off + len, dst_off);
        true
    }

    /// Isi `size` bytes dengan `pattern` berulang.
    ///
    /// `size` harus kelipatan panjang pattern.
    pub fn fill(&mut self, dst: Address, pattern: &[u8], size: u64) -> bool {
        if pattern.is_empty() || size % pattern.len() as u64 != 0 {
            return false;
        }

        match self.slice_mut(dst, size) {
            Some(region) => {
                for chunk in region.chunks_exact_mut(pattern.len()) {
                    chunk.copy_from_slice(pattern);
                }
                true
            }
            None => false,
        }
    }

    /// Sync isi arena ke file backing (no-op untuk anonymous)
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

fn check_capacity(capacity: usize) -> io::Result<()> {
    if capacity == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "device memory capacity must be non-zero",
        ));
    }
    Ok(())
}

#[inline(always)]
fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_alignment() {
        let mut mem = DeviceMemory::anonymous(64 * 1024).unwrap();

        let a = mem.allocate(10, 1).unwrap();
        assert_eq!(a, DEVICE_BASE);

        let b = mem.allocate(64, 256).unwrap();
        assert_eq!(b % 256, 0);
        assert!(b >= a + 10);

        assert!(mem.allocate(16, 3).is_none());
        assert!(mem.allocate(0, 8).is_none());
        assert_eq!(mem.live_allocations(), 2);
    }

    #[test]
    fn test_allocate_reuses_gap() {
        let mut mem = DeviceMemory::anonymous(4096).unwrap();

        let a = mem.allocate(1024, 0).unwrap();
        let b = mem.allocate(1024, 0).unwrap();
        assert!(mem.free(a));
        assert!(!mem.free(a));

        let c = mem.allocate(512, 0).unwrap();
        assert_eq!(c, a);
        assert!(mem.slice(b, 1024).is_some());
    }

    #[test]
    fn test_out_of_memory() {
        let mut mem = DeviceMemory::anonymous(4096).unwrap();
        assert!(mem.allocate(4097, 1).is_none());
        assert!(mem.allocate(4096, 1).is_some());
        assert!(mem.allocate(1, 1).is_none());
    }

    #[test]
    fn test_slice_bounds() {
        let mut mem = DeviceMemory::anonymous(4096).unwrap();
        let a = mem.allocate(100, 1).unwrap();

        assert!(mem.slice(a, 100).is_some());
        assert!(mem.slice(a + 50, 50).is_some());
        assert!(mem.slice(a + 50, 51).is_none());
        assert!(mem.slice(a + 100, 1).is_none());
        assert!(mem.slice(0, 1).is_none());
        assert!(mem.slice(a, u64::MAX).is_none());
    }

    #[test]
    fn test_fill_and_copy() {
        let mut mem = DeviceMemory::anonymous(4096).unwrap();
        let a = mem.allocate(16, 1).unwrap();
        let b = mem.allocate(16, 1).unwrap();

        assert!(mem.fill(a, &[0xAB, 0xCD], 16));
        assert!(!mem.fill(a, &[1, 2, 3], 16));
        assert!(!mem.fill(a, &[], 16));

        assert!(mem.copy(b, a, 16));
        assert_eq!(mem.slice(b, 4).unwrap(), &[0xAB, 0xCD, 0xAB, 0xCD]);

        // Overlap di dalam satu alokasi
        mem.slice_mut(a, 4).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert!(mem.copy(a + 1, a, 3));
        assert_eq!(mem.slice(a, 4).unwrap(), &[1, 1, 2, 3]);
    }

    #[test]
    fn test_file_backed_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.mem");

        {
            let mut mem = DeviceMemory::open(&path, 4096).unwrap();
            let a = mem.allocate(15, 1).unwrap();
            mem.slice_mut(a, 15).unwrap().copy_from_slice(b"Persistent data");
            mem.flush().unwrap();
        }

        // Alokasi tidak persist, tapi isi arena iya
        {
            let mut mem = DeviceMemory::open(&path, 4096).unwrap();
            let a = mem.allocate(15, 1).unwrap();
            assert_eq!(mem.slice(a, 15).unwrap(), b"Persistent data");
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(DeviceMemory::anonymous(0).is_err());
    }
}
