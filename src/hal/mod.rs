//! HAL interface boundary
//!
//! Operasi device-side yang dipanggil dispatcher setelah command
//! di-decode. Return type mengikuti shape reply di wire: `bool` untuk
//! reply bool32, `Option<handle>` untuk reply yang membawa handle
//! (`None` dikirim sebagai handle 0).

use crate::protocol::{Address, KernelArg, KernelHandle, NdRange, ProgramHandle};

pub trait Hal {
    fn device_create(&mut self) -> bool;

    fn device_delete(&mut self) -> bool;

    fn mem_alloc(&mut self, size: u64, alignment: u64) -> Option<Address>;

    fn mem_free(&mut self, address: Address) -> bool;

    fn mem_write(&mut self, dst: Address, data: &[u8]) -> bool;

    /// Baca `out.len()` bytes dari `src`
    fn mem_read(&mut self, src: Address, out: &mut [u8]) -> bool;

    /// Isi `size` bytes di `dst` dengan `pattern` berulang
    fn mem_fill(&mut self, dst: Address, pattern: &[u8], size: u64) -> bool;

    fn mem_copy(&mut self, dst: Address, src: Address, size: u64) -> bool;

    fn program_load(&mut self, binary: &[u8]) -> Option<ProgramHandle>;

    fn program_free(&mut self, program: ProgramHandle) -> bool;

    fn find_kernel(&mut self, program: ProgramHandle, name: &[u8]) -> Option<KernelHandle>;

    fn kernel_exec(
        &mut self,
        program: ProgramHandle,
        kernel: KernelHandle,
        nd_range: &NdRange,
        work_dim: u32,
        args: &[KernelArg<'_>],
    ) -> bool;
}
