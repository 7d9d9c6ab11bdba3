//! Zero-Copy Decoder
//!
//! Dua fase: `required_header_bytes(tag)` dulu, lalu `decode` setelah
//! bytes sebanyak itu tersedia. Kernel argument blob di-decode terpisah
//! setelah `args_data_size` bytes juga tersedia.

use tracing::warn;

use super::command::{CommandKind, FieldType};
use super::error::DecodeError;
use super::message::{AddressSpace, ArgKind, ArgValue, HeaderFields, KernelArg, Message};
use super::wire::{pull, pull_bytes, WireValue};

/// Ukuran minimum satu entry argument blob: kind + space + size
pub const ARG_ENTRY_MIN_SIZE: usize = 4 + 4 + 8;

/// Cursor baca dengan limit eksplisit
pub struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
    limit: usize,
}

impl<'a> Decoder<'a> {
    /// `limit` di-clamp ke panjang buffer
    #[inline(always)]
    pub fn new(buffer: &'a [u8], limit: usize) -> Self {
        Self {
            buffer,
            read_pos: 0,
            limit: limit.min(buffer.len()),
        }
    }

    #[inline(always)]
    pub fn pull<T: WireValue>(&mut self) -> Option<T> {
        pull(self.buffer, &mut self.read_pos, self.limit)
    }

    #[inline(always)]
    pub fn pull_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        pull_bytes(self.buffer, &mut self.read_pos, len, self.limit)
    }

    /// Bytes yang sudah dikonsumsi
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Bytes tersisa sampai limit
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.read_pos)
    }

    fn pull_field(&mut self, field: FieldType) -> Option<u64> {
        match field {
            FieldType::U32 => self.pull::<u32>().map(u64::from),
            FieldType::U64 => self.pull::<u64>(),
            FieldType::Bool32 => self.pull::<bool>().map(u64::from),
        }
    }

    /// Decode header `kind` dari posisi sekarang
    pub fn header(&mut self, kind: CommandKind) -> Result<Message, DecodeError> {
        let start = self.read_pos;
        let mut fields = HeaderFields::new();

        for &field in kind.fields() {
            match self.pull_field(field) {
                Some(value) => fields.push(value),
                None => {
                    return Err(DecodeError::Truncated {
                        needed: kind.header_size(),
                        available: self.limit.saturating_sub(start),
                    })
                }
            }
        }

        // required_header_bytes dan decode harus selalu sinkron
        debug_assert_eq!(self.read_pos - start, kind.header_size());
        debug_assert!(self.read_pos <= self.limit);

        Ok(Message::from_fields(kind, fields.as_slice()))
    }
}

/// Decode header untuk raw tag di wire.
///
/// Tidak pernah membaca melewati `size` bytes dari `buffer`.
pub fn decode(tag: u32, buffer: &[u8], size: usize) -> Result<Message, DecodeError> {
    let Some(kind) = CommandKind::from_u32(tag) else {
        warn!(tag, "unknown command kind");
        return Err(DecodeError::UnknownCommand(tag));
    };
    decode_kind(kind, buffer, size)
}

/// Seperti `decode`, untuk kind yang sudah diketahui
pub fn decode_kind(kind: CommandKind, buffer: &[u8], size: usize) -> Result<Message, DecodeError> {
    Decoder::new(buffer, size).header(kind)
}

/// Hasil decode argument blob beserta offset akhirnya
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArgs<'a> {
    pub args: Vec<KernelArg<'a>>,
    /// Total bytes yang dikonsumsi semua entry
    pub consumed: usize,
}

impl<'a> DecodedArgs<'a> {
    /// Pastikan blob dikonsumsi tepat `declared` bytes
    pub fn exact(self, declared: usize) -> Result<Vec<KernelArg<'a>>, DecodeError> {
        if self.consumed != declared {
            return Err(DecodeError::ArgumentBlobMismatch {
                declared,
                consumed: self.consumed,
            });
        }
        Ok(self.args)
    }
}

/// Decode `num_args` kernel argument dari `blob` (zero-copy untuk inline data).
///
/// All-or-nothing: pull pertama yang gagal membuang semua argument
/// yang sudah ter-decode.
pub fn decode_kernel_args(
    blob: &[u8],
    num_args: u32,
    blob_size: usize,
) -> Result<DecodedArgs<'_>, DecodeError> {
    let mut decoder = Decoder::new(blob, blob_size);
    let num_args = num_args as usize;

    // Jangan alokasi berdasarkan count yang tidak mungkin muat
    let min_needed = num_args.saturating_mul(ARG_ENTRY_MIN_SIZE);
    if min_needed > decoder.remaining() {
        return Err(DecodeError::Truncated {
            needed: min_needed,
            available: decoder.remaining(),
        });
    }

    let mut args = Vec::with_capacity(num_args);
    for _ in 0..num_args {
        let arg = decode_arg(&mut decoder).ok_or(DecodeError::Truncated {
            needed: decoder.position() + ARG_ENTRY_MIN_SIZE,
            available: blob_size.min(blob.len()),
        })?;
        args.push(arg);
    }

    Ok(DecodedArgs {
        args,
        consumed: decoder.position(),
    })
}

fn decode_arg<'a>(decoder: &mut Decoder<'a>) -> Option<KernelArg<'a>> {
    let kind = ArgKind::from_u32(decoder.pull::<u32>()?);
    let space = AddressSpace(decoder.pull::<u32>()?);
    let size = decoder.pull::<u64>()?;

    let value = match kind {
        ArgKind::Address => ArgValue::Address(decoder.pull::<u64>()?),
        ArgKind::Data => {
            let len = usize::try_from(size).ok()?;
            ArgValue::Data(decoder.pull_bytes(len)?)
        }
    };

    Some(KernelArg { space, size, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::{MAX_HEADER_FIELDS, UNKNOWN_COMMAND};
    use crate::protocol::encoder::{encode, encode_kernel_args};
    use crate::protocol::message::NdRange;

    #[test]
    fn test_mem_alloc_scenario() {
        let bytes = encode(&Message::MemAlloc {
            size: 4096,
            alignment: 64,
        });
        assert_eq!(bytes.len(), 16);

        let msg = decode(CommandKind::MemAlloc as u32, &bytes, bytes.len()).unwrap();
        assert_eq!(
            msg,
            Message::MemAlloc {
                size: 4096,
                alignment: 64
            }
        );

        let err = decode(CommandKind::MemAlloc as u32, &bytes, 8).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn test_every_short_size_is_truncated() {
        for kind in CommandKind::ALL {
            let values: Vec<u64> = (0..kind.fields().len() as u64).map(|v| v + 1).collect();
            let msg = Message::from_fields(kind, &values);
            let bytes = encode(&msg);
            let n = kind.header_size();

            for size in 0..n {
                assert_eq!(
                    decode_kind(kind, &bytes, size),
                    Err(DecodeError::Truncated {
                        needed: n,
                        available: size
                    }),
                    "{:?} size {}",
                    kind,
                    size
                );
            }
            assert_eq!(decode_kind(kind, &bytes, n), Ok(msg));
        }
    }

    #[test]
    fn test_max_field_values_survive() {
        for kind in CommandKind::ALL {
            let values: Vec<u64> = kind
                .fields()
                .iter()
                .map(|field| match field {
                    FieldType::U32 => u64::from(u32::MAX),
                    FieldType::U64 => u64::MAX,
                    FieldType::Bool32 => 1,
                })
                .collect();
            let msg = Message::from_fields(kind, &values);
            assert_eq!(msg.fields().as_slice(), values.as_slice(), "{:?}", kind);

            let bytes = encode(&msg);
            assert_eq!(bytes.len(), kind.header_size());
            let decoded = decode(kind as u32, &bytes, bytes.len()).unwrap();
            assert_eq!(decoded, msg, "{:?}", kind);
            assert_eq!(decoded.fields().as_slice(), values.as_slice());
        }

        // Field u32 hanya 4 byte: semua bit 1, tidak ada byte tambahan
        let exec = Message::from_fields(
            CommandKind::KernelExec,
            &[u64::MAX; MAX_HEADER_FIELDS],
        );
        let Message::KernelExec {
            num_args,
            work_dim,
            args_data_size,
            nd_range,
            ..
        } = exec
        else {
            panic!("expected KernelExec");
        };
        assert_eq!((num_args, work_dim, args_data_size), (u32::MAX, u32::MAX, u32::MAX));
        assert_eq!(nd_range.local, [u64::MAX; 3]);
        assert!(encode(&exec).iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_size_larger_than_header_ok() {
        let mut bytes = encode(&Message::MemFree { address: 0xABC0 });
        bytes.extend_from_slice(&[0xEE; 32]);
        let msg = decode(CommandKind::MemFree as u32, &bytes, bytes.len()).unwrap();
        assert_eq!(msg, Message::MemFree { address: 0xABC0 });
    }

    #[test]
    fn test_size_beyond_buffer_is_clamped() {
        let bytes = encode(&Message::MemAlloc {
            size: 1,
            alignment: 1,
        });
        let err = decode(CommandKind::MemAlloc as u32, &bytes[..10], 1 << 20).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            decode(UNKNOWN_COMMAND, &[0u8; 128], 128),
            Err(DecodeError::UnknownCommand(UNKNOWN_COMMAND))
        );
    }

    #[test]
    fn test_zero_length_headers() {
        assert_eq!(
            decode(CommandKind::DeviceCreate as u32, &[], 0),
            Ok(Message::DeviceCreate)
        );
        assert_eq!(
            decode(CommandKind::DeviceDelete as u32, &[], 0),
            Ok(Message::DeviceDelete)
        );
    }

    #[test]
    fn test_kernel_exec_scenario() {
        let inline = [0x01u8, 0x02, 0x03, 0x04];
        let args = vec![
            KernelArg::address(AddressSpace::GLOBAL, 256, 0xDEAD_BEEF),
            KernelArg::data(AddressSpace::GLOBAL, &inline),
        ];
        let blob = encode_kernel_args(&args);
        assert_eq!(blob.len(), 44);

        let header = encode(&Message::KernelExec {
            program: 1,
            kernel: 2,
            num_args: 2,
            nd_range: NdRange {
                offset: [0; 3],
                global: [64, 1, 1],
                local: [8, 1, 1],
            },
            work_dim: 1,
            args_data_size: blob.len() as u32,
        });
        let msg = decode(CommandKind::KernelExec as u32, &header, header.len()).unwrap();
        let (num_args, args_data_size) = match msg {
            Message::KernelExec {
                num_args,
                args_data_size,
                ..
            } => (num_args, args_data_size as usize),
            other => panic!("unexpected {:?}", other),
        };

        let decoded = decode_kernel_args(&blob, num_args, args_data_size)
            .unwrap()
            .exact(args_data_size)
            .unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].kind(), ArgKind::Address);
        assert_eq!(decoded[0].as_address(), Some(0xDEAD_BEEF));
        assert_eq!(decoded[1].kind(), ArgKind::Data);
        assert_eq!(decoded[1].size, 4);
        assert_eq!(decoded[1].as_data(), Some(&inline[..]));
    }

    #[test]
    fn test_kernel_args_reference_blob() {
        let payload = [9u8; 24];
        let args = vec![
            KernelArg::data(AddressSpace::LOCAL, &payload[..3]),
            KernelArg::address(AddressSpace::LOCAL, 0, 0),
            KernelArg::data(AddressSpace::GLOBAL, &payload),
        ];
        let blob = encode_kernel_args(&args);
        let decoded = decode_kernel_args(&blob, 3, blob.len()).unwrap();
        assert_eq!(decoded.consumed, blob.len());
        assert_eq!(decoded.args, args);

        // Inline data menunjuk ke blob, bukan salinan
        let data = decoded.args[2].as_data().unwrap();
        let blob_range = blob.as_ptr_range();
        assert!(blob_range.contains(&data.as_ptr()));
    }

    #[test]
    fn test_kernel_args_truncated_is_all_or_nothing() {
        let inline = [1u8; 8];
        let args = vec![
            KernelArg::address(AddressSpace::GLOBAL, 8, 0x4000),
            KernelArg::data(AddressSpace::GLOBAL, &inline),
        ];
        let blob = encode_kernel_args(&args);

        for size in 0..blob.len() {
            let result = decode_kernel_args(&blob, 2, size);
            assert!(result.unwrap_err().is_truncated(), "size {}", size);
        }
    }

    #[test]
    fn test_kernel_args_mismatch() {
        let args = vec![KernelArg::address(AddressSpace::GLOBAL, 8, 0x4000)];
        let mut blob = encode_kernel_args(&args);
        blob.extend_from_slice(&[0u8; 4]);

        let decoded = decode_kernel_args(&blob, 1, blob.len()).unwrap();
        assert_eq!(decoded.consumed, 24);
        assert_eq!(
            decoded.exact(blob.len()),
            Err(DecodeError::ArgumentBlobMismatch {
                declared: 28,
                consumed: 24
            })
        );
    }

    #[test]
    fn test_huge_num_args_rejected_early() {
        let blob = [0u8; 32];
        let err = decode_kernel_args(&blob, u32::MAX, blob.len()).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn test_huge_inline_size_rejected() {
        let mut blob = Vec::new();
        crate::protocol::wire::push(ArgKind::Data as u32, &mut blob);
        crate::protocol::wire::push(1u32, &mut blob);
        crate::protocol::wire::push(u64::MAX, &mut blob);
        let err = decode_kernel_args(&blob, 1, blob.len()).unwrap_err();
        assert!(err.is_truncated());
    }
}
