//! Host Device: implementasi `Hal` di dalam proses
//!
//! Loopback device untuk `hal_server` dan integration test.
//! Memory device berasal dari `DeviceMemory` (mmap), program adalah
//! teks UTF-8 berisi satu nama kernel per baris, dan setiap kernel
//! dijalankan oleh builtin yang di-register lewat `register_kernel`.

use std::collections::HashMap;
use std::io;

use tracing::{debug, warn};

use super::device_memory::DeviceMemory;
use crate::hal::Hal;
use crate::protocol::{Address, KernelArg, KernelHandle, NdRange, ProgramHandle};

/// Konteks satu eksekusi kernel builtin
pub struct KernelInvocation<'m, 'a> {
    pub nd_range: NdRange,
    pub work_dim: u32,
    pub args: &'m [KernelArg<'a>],
    pub memory: &'m mut DeviceMemory,
}

impl KernelInvocation<'_, '_> {
    /// Jumlah work-item total di semua dimensi aktif.
    /// `None` jika hasil kali overflow u64 (nilai datang langsung dari wire).
    pub fn global_size(&self) -> Option<u64> {
        self.nd_range.global[..self.work_dim as usize]
            .iter()
            .try_fold(1u64, |acc, &g| acc.checked_mul(g))
    }
}

/// Builtin kernel: return `false` jika eksekusi gagal
pub type KernelFn = Box<dyn Fn(&mut KernelInvocation<'_, '_>) -> bool + Send>;

struct Program {
    kernels: Vec<String>,
}

struct KernelEntry {
    program: ProgramHandle,
    name: String,
}

/// In-process device
pub struct HostDevice {
    memory: DeviceMemory,
    created: bool,
    programs: HashMap<ProgramHandle, Program>,
    kernels: HashMap<KernelHandle, KernelEntry>,
    builtins: HashMap<String, KernelFn>,
    next_handle: u64,
}

impl HostDevice {
    pub fn new(memory: DeviceMemory) -> Self {
        Self {
            memory,
            created: false,
            programs: HashMap::new(),
            kernels: HashMap::new(),
            builtins: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Device dengan arena anonymous sebesar `capacity` bytes
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self::new(DeviceMemory::anonymous(capacity)?))
    }

    /// Register builtin kernel. Nama yang sama akan di-replace.
    pub fn register_kernel<F>(&mut self, name: &str, kernel: F)
    where
        F: Fn(&mut KernelInvocation<'_, '_>) -> bool + Send + 'static,
    {
        self.builtins.insert(name.to_string(), Box::new(kernel));
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    fn alloc_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Hal for HostDevice {
    fn device_create(&mut self) -> bool {
        self.created = true;
        true
    }

    fn device_delete(&mut self) -> bool {
        if !self.created {
            return false;
        }

        self.memory.clear();
        self.programs.clear();
        self.kernels.clear();
        self.created = false;

        if let Err(e) = self.memory.flush() {
            warn!("device memory flush failed: {}", e);
        }
        true
    }

    fn mem_alloc(&mut self, size: u64, alignment: u64) -> Option<Address> {
        if !self.created {
            return None;
        }
        let address = self.memory.allocate(size, alignment);
        if address.is_none() {
            debug!(size, alignment, "device allocation failed");
        }
        address
    }

    fn mem_free(&mut self, address: Address) -> bool {
        self.created && self.memory.free(address)
    }

    fn mem_write(&mut self, dst: Address, data: &[u8]) -> bool {
        if !self.created {
            return false;
        }
        match self.memory.slice_mut(dst, data.len() as u64) {
            Some(region) => {
                region.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn mem_read(&mut self, src: Address, out: &mut [u8]) -> bool {
        if !self.created {
            return false;
        }
        match self.memory.slice(src, out.len() as u64) {
            Some(region) => {
                out.copy_from_slice(region);
                true
            }
            None => false,
        }
    }

    fn mem_fill(&mut self, dst: Address, pattern: &[u8], size: u64) -> bool {
        self.created && self.memory.fill(dst, pattern, size)
    }

    fn mem_copy(&mut self, dst: Address, src: Address, size: u64) -> bool {
        self.created && self.memory.copy(dst, src, size)
    }

    fn program_load(&mut self, binary: &[u8]) -> Option<ProgramHandle> {
        if !self.created {
            return None;
        }

        let text = std::str::from_utf8(binary).ok()?;
        let kernels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if kernels.is_empty() {
            return None;
        }

        let handle = self.alloc_handle();
        debug!(program = handle, kernels = kernels.len(), "program loaded");
        self.programs.insert(handle, Program { kernels });
        Some(handle)
    }

    fn program_free(&mut self, program: ProgramHandle) -> bool {
        if !self.created || self.programs.remove(&program).is_none() {
            return false;
        }
        // Kernel handle dari program ini ikut invalid
        self.kernels.retain(|_, entry| entry.program != program);
        true
    }

    fn find_kernel(&mut self, program: ProgramHandle, name: &[u8]) -> Option<KernelHandle> {
        if !self.created {
            return None;
        }

        let name = std::str::from_utf8(name).ok()?;
        let listed = self
            .programs
            .get(&program)?
            .kernels
            .iter()
            .any(|k| k == name);
        if !listed || !self.builtins.contains_key(name) {
            debug!(program, kernel = name, "kernel not found");
            return None;
        }

        let handle = self.alloc_handle();
        self.kernels.insert(
            handle,
            KernelEntry {
                program,
                name: name.to_string(),
            },
        );
        Some(handle)
    }

    fn kernel_exec(
        &mut self,
        program: ProgramHandle,
        kernel: KernelHandle,
        nd_range: &NdRange,
        work_dim: u32,
        args: &[KernelArg<'_>],
    ) -> bool {
        if !self.created || !(1..=3).contains(&work_dim) {
            return false;
        }

        let Some(entry) = self.kernels.get(&kernel) else {
            return false;
        };
        if entry.program != program {
            return false;
        }
        let Some(builtin) = self.builtins.get(&entry.name) else {
            return false;
        };

        let mut invocation = KernelInvocation {
            nd_range: *nd_range,
            work_dim,
            args,
            memory: &mut self.memory,
        };
        builtin(&mut invocation)
    }
}
