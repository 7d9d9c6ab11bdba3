//! Encoder
//!
//! Mirror dari decoder: berjalan di atas tabel field yang sama
//! (`CommandKind::fields`) sehingga urutan field tidak bisa drift.

use super::command::FieldType;
use super::message::{ArgKind, ArgValue, KernelArg, Message};
use super::wire::push;

/// Encode header `msg` ke buffer baru
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.kind().header_size());
    encode_into(msg, &mut out);
    out
}

/// Append header `msg` ke `out`.
///
/// Tepat `msg.kind().header_size()` bytes yang ditulis.
pub fn encode_into(msg: &Message, out: &mut Vec<u8>) {
    let kind = msg.kind();
    let fields = msg.fields();

    for (&field, &value) in kind.fields().iter().zip(fields.as_slice()) {
        match field {
            FieldType::U32 => push(value as u32, out),
            FieldType::U64 => push(value, out),
            FieldType::Bool32 => push(value != 0, out),
        }
    }
}

/// Encode kernel argument blob
pub fn encode_kernel_args(args: &[KernelArg<'_>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(kernel_args_size(args));
    encode_kernel_args_into(args, &mut out);
    out
}

/// Append kernel argument blob ke `out`.
///
/// Urutan per entry: kind, space, size, lalu address atau raw bytes.
/// Untuk inline data, size yang ditulis selalu panjang slice.
pub fn encode_kernel_args_into(args: &[KernelArg<'_>], out: &mut Vec<u8>) {
    for arg in args {
        push(arg.kind() as u32, out);
        push(arg.space.0, out);
        match arg.value {
            ArgValue::Address(address) => {
                push(arg.size, out);
                push(address, out);
            }
            ArgValue::Data(data) => {
                push(data.len() as u64, out);
                out.extend_from_slice(data);
            }
        }
    }
}

/// Ukuran blob hasil `encode_kernel_args`, untuk `args_data_size`
pub fn kernel_args_size(args: &[KernelArg<'_>]) -> usize {
    args.iter()
        .map(|arg| {
            let body = match arg.value {
                ArgValue::Address(_) => 8,
                ArgValue::Data(data) => data.len(),
            };
            4 + 4 + 8 + body
        })
        .sum()
}

/// Pre-allocated frame encoder
///
/// Frame: `[tag:u32][header][payload]`. Tag adalah outer framing
/// transport; header dan payload mengikuti catalog.
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    /// Membuat encoder dengan kapasitas awal tertentu
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Reset encoder untuk reuse
    #[inline(always)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Append satu frame, returns slice ke frame tersebut
    pub fn frame(&mut self, msg: &Message, payload: &[u8]) -> &[u8] {
        let start = self.buffer.len();
        push(msg.kind() as u32, &mut self.buffer);
        encode_into(msg, &mut self.buffer);
        self.buffer.extend_from_slice(payload);
        &self.buffer[start..]
    }

    /// Append kernel-exec frame dengan argument blob langsung di belakang header
    pub fn frame_kernel_exec(&mut self, msg: &Message, args: &[KernelArg<'_>]) -> &[u8] {
        debug_assert_eq!(msg.payload_len(), Some(kernel_args_size(args) as u64));

        let start = self.buffer.len();
        push(msg.kind() as u32, &mut self.buffer);
        encode_into(msg, &mut self.buffer);
        encode_kernel_args_into(args, &mut self.buffer);
        &self.buffer[start..]
    }

    /// Seluruh isi buffer
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(4096)
    }
}
