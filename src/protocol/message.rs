//! Message Model
//!
//! Layout per command:
//! ┌─────────────────────────────────────────────────────┐
//! │ tag: u32 (outer framing, milik transport)           │
//! ├─────────────────────────────────────────────────────┤
//! │ Header (fixed, lihat `CommandKind::fields`)         │
//! ├─────────────────────────────────────────────────────┤
//! │ Out-of-band payload (panjang tercatat di header)    │
//! └─────────────────────────────────────────────────────┘
//!
//! `Message` hanya memegang field header. Payload out-of-band
//! (write data, fill pattern, binary, kernel name, argument blob)
//! dibaca terpisah oleh caller.

use super::command::{CommandKind, MAX_HEADER_FIELDS};

/// Device address
pub type Address = u64;
/// Handle program di device
pub type ProgramHandle = u64;
/// Handle kernel di device
pub type KernelHandle = u64;

/// N-dimensional range, selalu 3 komponen per sumbu
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NdRange {
    pub offset: [u64; 3],
    pub global: [u64; 3],
    pub local: [u64; 3],
}

/// Satu command atau reply yang sudah di-decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    MemAlloc { size: u64, alignment: u64 },
    MemAllocReply { address: Address },
    MemFree { address: Address },
    MemFreeReply { success: bool },
    MemWrite { dst: Address, size: u64 },
    MemWriteReply { success: bool },
    MemRead { src: Address, size: u64 },
    MemReadReply { success: bool },
    MemFill { dst: Address, pattern_size: u64, size: u64 },
    MemFillReply { success: bool },
    MemCopy { dst: Address, src: Address, size: u64 },
    MemCopyReply { success: bool },
    ProgramFree { program: ProgramHandle },
    ProgramFreeReply { success: bool },
    ProgramLoad { size: u64 },
    ProgramLoadReply { program: ProgramHandle },
    FindKernel { program: ProgramHandle, name_size: u64 },
    FindKernelReply { kernel: KernelHandle },
    KernelExec {
        program: ProgramHandle,
        kernel: KernelHandle,
        num_args: u32,
        nd_range: NdRange,
        work_dim: u32,
        args_data_size: u32,
    },
    KernelExecReply { success: bool },
    DeviceCreate,
    DeviceCreateReply { success: bool },
    DeviceDelete,
    DeviceDeleteReply { success: bool },
}

/// Nilai field header dalam urutan wire.
///
/// Setiap slot u64; field U32/Bool32 disimpan zero-extended.
#[derive(Debug, Clone, Copy)]
pub struct HeaderFields {
    values: [u64; MAX_HEADER_FIELDS],
    len: usize,
}

impl HeaderFields {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            values: [0; MAX_HEADER_FIELDS],
            len: 0,
        }
    }

    #[inline(always)]
    pub fn push(&mut self, value: u64) {
        self.values[self.len] = value;
        self.len += 1;
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u64] {
        &self.values[..self.len]
    }
}

impl Default for HeaderFields {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> From<[u64; N]> for HeaderFields {
    fn from(values: [u64; N]) -> Self {
        let mut fields = HeaderFields::new();
        for value in values {
            fields.push(value);
        }
        fields
    }
}

impl Message {
    pub fn kind(&self) -> CommandKind {
        match self {
            Message::MemAlloc { .. } => CommandKind::MemAlloc,
            Message::MemAllocReply { .. } => CommandKind::MemAllocReply,
            Message::MemFree { .. } => CommandKind::MemFree,
            Message::MemFreeReply { .. } => CommandKind::MemFreeReply,
            Message::MemWrite { .. } => CommandKind::MemWrite,
            Message::MemWriteReply { .. } => CommandKind::MemWriteReply,
            Message::MemRead { .. } => CommandKind::MemRead,
            Message::MemReadReply { .. } => CommandKind::MemReadReply,
            Message::MemFill { .. } => CommandKind::MemFill,
            Message::MemFillReply { .. } => CommandKind::MemFillReply,
            Message::MemCopy { .. } => CommandKind::MemCopy,
            Message::MemCopyReply { .. } => CommandKind::MemCopyReply,
            Message::ProgramFree { .. } => CommandKind::ProgramFree,
            Message::ProgramFreeReply { .. } => CommandKind::ProgramFreeReply,
            Message::ProgramLoad { .. } => CommandKind::ProgramLoad,
            Message::ProgramLoadReply { .. } => CommandKind::ProgramLoadReply,
            Message::FindKernel { .. } => CommandKind::FindKernel,
            Message::FindKernelReply { .. } => CommandKind::FindKernelReply,
            Message::KernelExec { .. } => CommandKind::KernelExec,
            Message::KernelExecReply { .. } => CommandKind::KernelExecReply,
            Message::DeviceCreate => CommandKind::DeviceCreate,
            Message::DeviceCreateReply { .. } => CommandKind::DeviceCreateReply,
            Message::DeviceDelete => CommandKind::DeviceDelete,
            Message::DeviceDeleteReply { .. } => CommandKind::DeviceDeleteReply,
        }
    }

    /// Reply bool32 untuk `kind`. `None` jika reply kind itu membawa handle.
    pub fn bool_reply(kind: CommandKind, success: bool) -> Option<Message> {
        let reply = match kind.reply() {
            CommandKind::MemFreeReply => Message::MemFreeReply { success },
            CommandKind::MemWriteReply => Message::MemWriteReply { success },
            CommandKind::MemReadReply => Message::MemReadReply { success },
            CommandKind::MemFillReply => Message::MemFillReply { success },
            CommandKind::MemCopyReply => Message::MemCopyReply { success },
            CommandKind::ProgramFreeReply => Message::ProgramFreeReply { success },
            CommandKind::KernelExecReply => Message::KernelExecReply { success },
            CommandKind::DeviceCreateReply => Message::DeviceCreateReply { success },
            CommandKind::DeviceDeleteReply => Message::DeviceDeleteReply { success },
            _ => return None,
        };
        Some(reply)
    }

    /// Nilai bool32 dari reply, `None` untuk variant lain
    pub fn success(&self) -> Option<bool> {
        match *self {
            Message::MemFreeReply { success }
            | Message::MemWriteReply { success }
            | Message::MemReadReply { success }
            | Message::MemFillReply { success }
            | Message::MemCopyReply { success }
            | Message::ProgramFreeReply { success }
            | Message::KernelExecReply { success }
            | Message::DeviceCreateReply { success }
            | Message::DeviceDeleteReply { success } => Some(success),
            _ => None,
        }
    }

    /// Handle dari reply MemAlloc/ProgramLoad/FindKernel
    pub fn handle(&self) -> Option<u64> {
        match *self {
            Message::MemAllocReply { address } => Some(address),
            Message::ProgramLoadReply { program } => Some(program),
            Message::FindKernelReply { kernel } => Some(kernel),
            _ => None,
        }
    }

    /// Panjang out-of-band payload yang mengikuti header request ini
    pub fn payload_len(&self) -> Option<u64> {
        match *self {
            Message::MemWrite { size, .. } => Some(size),
            Message::MemFill { pattern_size, .. } => Some(pattern_size),
            Message::ProgramLoad { size } => Some(size),
            Message::FindKernel { name_size, .. } => Some(name_size),
            Message::KernelExec { args_data_size, .. } => Some(u64::from(args_data_size)),
            _ => None,
        }
    }

    /// Flatten ke field header dalam urutan `kind().fields()`
    pub fn fields(&self) -> HeaderFields {
        match *self {
            Message::MemAlloc { size, alignment } => [size, alignment].into(),
            Message::MemAllocReply { address } => [address].into(),
            Message::MemFree { address } => [address].into(),
            Message::MemWrite { dst, size } => [dst, size].into(),
            Message::MemRead { src, size } => [src, size].into(),
            Message::MemFill {
                dst,
                pattern_size,
                size,
            } => [dst, pattern_size, size].into(),
            Message::MemCopy { dst, src, size } => [dst, src, size].into(),
            Message::ProgramFree { program } => [program].into(),
            Message::ProgramLoad { size } => [size].into(),
            Message::ProgramLoadReply { program } => [program].into(),
            Message::FindKernel { program, name_size } => [program, name_size].into(),
            Message::FindKernelReply { kernel } => [kernel].into(),
            Message::KernelExec {
                program,
                kernel,
                num_args,
                nd_range,
                work_dim,
                args_data_size,
            } => {
                let mut fields = HeaderFields::new();
                fields.push(program);
                fields.push(kernel);
                fields.push(u64::from(num_args));
                for axis in [nd_range.offset, nd_range.global, nd_range.local] {
                    for v in axis {
                        fields.push(v);
                    }
                }
                fields.push(u64::from(work_dim));
                fields.push(u64::from(args_data_size));
                fields
            }
            Message::DeviceCreate | Message::DeviceDelete => HeaderFields::new(),
            Message::MemFreeReply { success }
            | Message::MemWriteReply { success }
            | Message::MemReadReply { success }
            | Message::MemFillReply { success }
            | Message::MemCopyReply { success }
            | Message::ProgramFreeReply { success }
            | Message::KernelExecReply { success }
            | Message::DeviceCreateReply { success }
            | Message::DeviceDeleteReply { success } => [u64::from(success)].into(),
        }
    }

    /// Kebalikan dari `fields()`.
    ///
    /// `v` harus berisi tepat `kind.fields().len()` nilai.
    pub fn from_fields(kind: CommandKind, v: &[u64]) -> Message {
        debug_assert_eq!(v.len(), kind.fields().len());

        match kind {
            CommandKind::MemAlloc => Message::MemAlloc {
                size: v[0],
                alignment: v[1],
            },
            CommandKind::MemAllocReply => Message::MemAllocReply { address: v[0] },
            CommandKind::MemFree => Message::MemFree { address: v[0] },
            CommandKind::MemWrite => Message::MemWrite {
                dst: v[0],
                size: v[1],
            },
            CommandKind::MemRead => Message::MemRead {
                src: v[0],
                size: v[1],
            },
            CommandKind::MemFill => Message::MemFill {
                dst: v[0],
                pattern_size: v[1],
                size: v[2],
            },
            CommandKind::MemCopy => Message::MemCopy {
                dst: v[0],
                src: v[1],
                size: v[2],
            },
            CommandKind::ProgramFree => Message::ProgramFree { program: v[0] },
            CommandKind::ProgramLoad => Message::ProgramLoad { size: v[0] },
            CommandKind::ProgramLoadReply => Message::ProgramLoadReply { program: v[0] },
            CommandKind::FindKernel => Message::FindKernel {
                program: v[0],
                name_size: v[1],
            },
            CommandKind::FindKernelReply => Message::FindKernelReply { kernel: v[0] },
            CommandKind::KernelExec => Message::KernelExec {
                program: v[0],
                kernel: v[1],
                num_args: v[2] as u32,
                nd_range: NdRange {
                    offset: [v[3], v[4], v[5]],
                    global: [v[6], v[7], v[8]],
                    local: [v[9], v[10], v[11]],
                },
                work_dim: v[12] as u32,
                args_data_size: v[13] as u32,
            },
            CommandKind::DeviceCreate => Message::DeviceCreate,
            CommandKind::DeviceDelete => Message::DeviceDelete,
            CommandKind::MemFreeReply
            | CommandKind::MemWriteReply
            | CommandKind::MemReadReply
            | CommandKind::MemFillReply
            | CommandKind::MemCopyReply
            | CommandKind::ProgramFreeReply
            | CommandKind::KernelExecReply
            | CommandKind::DeviceCreateReply
            | CommandKind::DeviceDeleteReply => {
                // Semua bool reply berbagi shape yang sama
                match Message::bool_reply(kind, v[0] != 0) {
                    Some(reply) => reply,
                    None => unreachable!("{:?} is a bool32 reply", kind),
                }
            }
        }
    }
}

/// Jenis kernel argument di wire
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Device address (buffer)
    Address = 0,
    /// Plain data inline (scalar / struct POD)
    Data = 1,
}

impl ArgKind {
    /// Semua tag selain `Address` dianggap inline data
    #[inline(always)]
    pub fn from_u32(v: u32) -> Self {
        if v == ArgKind::Address as u32 {
            ArgKind::Address
        } else {
            ArgKind::Data
        }
    }
}

/// Address-space tag dari kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpace(pub u32);

impl AddressSpace {
    pub const LOCAL: AddressSpace = AddressSpace(0);
    pub const GLOBAL: AddressSpace = AddressSpace(1);
}

/// Payload kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgValue<'a> {
    Address(Address),
    /// Borrowed view ke argument blob, tidak di-copy
    Data(&'a [u8]),
}

/// Satu kernel argument.
///
/// Lifetime `'a` mengikat inline data ke buffer asal decode;
/// argument list tidak bisa hidup lebih lama dari buffer itu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelArg<'a> {
    pub space: AddressSpace,
    pub size: u64,
    pub value: ArgValue<'a>,
}

impl<'a> KernelArg<'a> {
    /// Argument buffer: `size` adalah ukuran buffer di device
    pub fn address(space: AddressSpace, size: u64, address: Address) -> Self {
        Self {
            space,
            size,
            value: ArgValue::Address(address),
        }
    }

    /// Argument inline: `size` selalu `data.len()`
    pub fn data(space: AddressSpace, data: &'a [u8]) -> Self {
        Self {
            space,
            size: data.len() as u64,
            value: ArgValue::Data(data),
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> ArgKind {
        match self.value {
            ArgValue::Address(_) => ArgKind::Address,
            ArgValue::Data(_) => ArgKind::Data,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self.value {
            ArgValue::Address(address) => Some(address),
            ArgValue::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&'a [u8]> {
        match self.value {
            ArgValue::Data(data) => Some(data),
            ArgValue::Address(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: CommandKind) -> Message {
        // Nilai berbeda per slot supaya urutan yang tertukar ketahuan
        let values: Vec<u64> = kind
            .fields()
            .iter()
            .enumerate()
            .map(|(i, field)| match field {
                crate::protocol::FieldType::Bool32 => 1,
                _ => 0x10 + i as u64,
            })
            .collect();
        Message::from_fields(kind, &values)
    }

    #[test]
    fn test_fields_match_catalog() {
        for kind in CommandKind::ALL {
            let msg = sample(kind);
            assert_eq!(msg.kind(), kind);
            assert_eq!(msg.fields().as_slice().len(), kind.fields().len(), "{:?}", kind);
            assert_eq!(Message::from_fields(kind, msg.fields().as_slice()), msg);
        }
    }

    #[test]
    fn test_kernel_exec_field_order() {
        let msg = Message::KernelExec {
            program: 1,
            kernel: 2,
            num_args: 3,
            nd_range: NdRange {
                offset: [4, 5, 6],
                global: [7, 8, 9],
                local: [10, 11, 12],
            },
            work_dim: 13,
            args_data_size: 14,
        };
        let expected: Vec<u64> = (1..=14).collect();
        assert_eq!(msg.fields().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(Message::MemWrite { dst: 0x1000, size: 64 }.payload_len(), Some(64));
        assert_eq!(
            Message::MemFill {
                dst: 0,
                pattern_size: 4,
                size: 64
            }
            .payload_len(),
            Some(4)
        );
        assert_eq!(Message::MemRead { src: 0, size: 64 }.payload_len(), None);
        assert_eq!(Message::DeviceCreate.payload_len(), None);
    }

    #[test]
    fn test_arg_kind_from_u32() {
        assert_eq!(ArgKind::from_u32(0), ArgKind::Address);
        assert_eq!(ArgKind::from_u32(1), ArgKind::Data);
        assert_eq!(ArgKind::from_u32(77), ArgKind::Data);
    }
}
