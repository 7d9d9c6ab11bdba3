//! Command Catalog
//!
//! Daftar tertutup semua command kind beserta shape header-nya.
//! Tabel `fields()` adalah satu-satunya sumber urutan field:
//! encoder dan decoder sama-sama berjalan di atas tabel ini.

use tracing::warn;

use super::error::DecodeError;

/// Sentinel tag yang dijamin tidak ada di catalog
pub const UNKNOWN_COMMAND: u32 = u32::MAX;

/// Offset antara tag request dan tag reply-nya
const REPLY_BIT: u32 = 0x100;

/// Tipe field fixed-width di header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U32,
    U64,
    /// Boolean, selalu 4 bytes di wire
    Bool32,
}

impl FieldType {
    /// Ukuran field di wire
    #[inline(always)]
    pub const fn size(self) -> usize {
        match self {
            FieldType::U32 | FieldType::Bool32 => 4,
            FieldType::U64 => 8,
        }
    }
}

/// Command kind di wire
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    MemAlloc = 1,
    MemFree = 2,
    MemWrite = 3,
    MemRead = 4,
    MemFill = 5,
    MemCopy = 6,
    ProgramFree = 7,
    ProgramLoad = 8,
    FindKernel = 9,
    KernelExec = 10,
    DeviceCreate = 11,
    DeviceDelete = 12,

    MemAllocReply = 1 | REPLY_BIT,
    MemFreeReply = 2 | REPLY_BIT,
    MemWriteReply = 3 | REPLY_BIT,
    MemReadReply = 4 | REPLY_BIT,
    MemFillReply = 5 | REPLY_BIT,
    MemCopyReply = 6 | REPLY_BIT,
    ProgramFreeReply = 7 | REPLY_BIT,
    ProgramLoadReply = 8 | REPLY_BIT,
    FindKernelReply = 9 | REPLY_BIT,
    KernelExecReply = 10 | REPLY_BIT,
    DeviceCreateReply = 11 | REPLY_BIT,
    DeviceDeleteReply = 12 | REPLY_BIT,
}

use FieldType::{Bool32, U32, U64};

const NO_FIELDS: &[FieldType] = &[];
const BOOL_REPLY: &[FieldType] = &[Bool32];
const ONE_HANDLE: &[FieldType] = &[U64];
const TWO_U64: &[FieldType] = &[U64, U64];
const THREE_U64: &[FieldType] = &[U64, U64, U64];

/// program, kernel, num_args, offset[3], global[3], local[3], work_dim, args_data_size
const KERNEL_EXEC: &[FieldType] = &[
    U64, U64, U32, U64, U64, U64, U64, U64, U64, U64, U64, U64, U32, U32,
];

/// Jumlah field terbanyak di satu header (KernelExec)
pub const MAX_HEADER_FIELDS: usize = KERNEL_EXEC.len();

impl CommandKind {
    /// Semua kind di catalog, request dulu lalu reply
    pub const ALL: [CommandKind; 24] = [
        CommandKind::MemAlloc,
        CommandKind::MemFree,
        CommandKind::MemWrite,
        CommandKind::MemRead,
        CommandKind::MemFill,
        CommandKind::MemCopy,
        CommandKind::ProgramFree,
        CommandKind::ProgramLoad,
        CommandKind::FindKernel,
        CommandKind::KernelExec,
        CommandKind::DeviceCreate,
        CommandKind::DeviceDelete,
        CommandKind::MemAllocReply,
        CommandKind::MemFreeReply,
        CommandKind::MemWriteReply,
        CommandKind::MemReadReply,
        CommandKind::MemFillReply,
        CommandKind::MemCopyReply,
        CommandKind::ProgramFreeReply,
        CommandKind::ProgramLoadReply,
        CommandKind::FindKernelReply,
        CommandKind::KernelExecReply,
        CommandKind::DeviceCreateReply,
        CommandKind::DeviceDeleteReply,
    ];

    #[inline(always)]
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| *kind as u32 == v)
    }

    /// Field header dalam urutan wire
    pub const fn fields(self) -> &'static [FieldType] {
        match self {
            CommandKind::MemAlloc => TWO_U64,
            CommandKind::MemFree => ONE_HANDLE,
            CommandKind::MemWrite => TWO_U64,
            CommandKind::MemRead => TWO_U64,
            CommandKind::MemFill => THREE_U64,
            CommandKind::MemCopy => THREE_U64,
            CommandKind::ProgramFree => ONE_HANDLE,
            CommandKind::ProgramLoad => ONE_HANDLE,
            CommandKind::FindKernel => TWO_U64,
            CommandKind::KernelExec => KERNEL_EXEC,
            CommandKind::DeviceCreate | CommandKind::DeviceDelete => NO_FIELDS,

            CommandKind::MemAllocReply
            | CommandKind::ProgramLoadReply
            | CommandKind::FindKernelReply => ONE_HANDLE,

            CommandKind::MemFreeReply
            | CommandKind::MemWriteReply
            | CommandKind::MemReadReply
            | CommandKind::MemFillReply
            | CommandKind::MemCopyReply
            | CommandKind::ProgramFreeReply
            | CommandKind::KernelExecReply
            | CommandKind::DeviceCreateReply
            | CommandKind::DeviceDeleteReply => BOOL_REPLY,
        }
    }

    /// Jumlah bytes header, tidak termasuk out-of-band payload
    pub const fn header_size(self) -> usize {
        let fields = self.fields();
        let mut total = 0;
        let mut i = 0;
        while i < fields.len() {
            total += fields[i].size();
            i += 1;
        }
        total
    }

    #[inline(always)]
    pub const fn is_reply(self) -> bool {
        (self as u32) & REPLY_BIT != 0
    }

    /// Reply counterpart dari request. Reply memetakan ke dirinya sendiri.
    pub fn reply(self) -> CommandKind {
        if self.is_reply() {
            return self;
        }
        // Setiap request punya reply dengan tag + REPLY_BIT
        Self::from_u32(self as u32 | REPLY_BIT).unwrap_or(self)
    }
}

/// Berapa bytes header yang dibutuhkan sebelum `decode` bisa dicoba.
///
/// Murni fungsi dari tag. Tag yang tidak dikenal di-log lalu
/// dikembalikan sebagai `UnknownCommand`, tidak pernah sebagai 0.
pub fn required_header_bytes(tag: u32) -> Result<usize, DecodeError> {
    match CommandKind::from_u32(tag) {
        Some(kind) => Ok(kind.header_size()),
        None => {
            warn!(tag, "unknown command kind");
            Err(DecodeError::UnknownCommand(tag))
        }
    }
}
