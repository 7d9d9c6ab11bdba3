//! Core module: Device memory dengan Mmap backing
//!
//! Prinsip desain:
//! - Zero-Copy: Memory device langsung di-mmap, read/write lewat slice
//! - Bounds-checked: Setiap akses harus jatuh di dalam satu alokasi hidup
//! - No-Allocation: Arena di-map sekali saat init

mod device_memory;
mod host_device;

pub use device_memory::{DeviceMemory, DEVICE_BASE};
pub use host_device::{HostDevice, KernelFn, KernelInvocation};
