//! Command Dispatcher (device side)
//!
//! Satu frame: `[tag:u32][header][out-of-band payload]`.
//! Dispatcher tidak menyimpan state antar frame: setiap `process`
//! mem-parse ulang dari awal input, dan connection menyimpan bytes
//! yang belum lengkap sampai panggilan berikutnya.

use thiserror::Error;
use tracing::{debug, warn};

use crate::hal::Hal;
use crate::protocol::{
    decode_kernel_args, decode_kind, required_header_bytes, wire, CommandKind, DecodeError,
    Encoder, Message, TAG_SIZE,
};

/// Default batas out-of-band payload per command
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024; // 64MB

/// Hasil satu langkah dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Satu command selesai dieksekusi, `n` bytes input dikonsumsi
    Consumed(usize),
    /// Frame belum lengkap: butuh total sekian bytes di depan input
    NeedBytes(usize),
}

/// Protocol violation: koneksi harus ditutup
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{kind:?} announces {len} payload bytes, limit is {max}")]
    PayloadTooLarge {
        kind: CommandKind,
        len: u64,
        max: usize,
    },

    #[error("reply {0:?} sent to device side")]
    UnexpectedReply(CommandKind),
}

/// Decode command dari input lalu eksekusi ke HAL
pub struct Dispatcher<H> {
    hal: H,
    max_payload_bytes: usize,
    encoder: Encoder,
    read_scratch: Vec<u8>,
}

impl<H: Hal> Dispatcher<H> {
    pub fn new(hal: H) -> Self {
        Self::with_max_payload(hal, DEFAULT_MAX_PAYLOAD_BYTES)
    }

    pub fn with_max_payload(hal: H, max_payload_bytes: usize) -> Self {
        Self {
            hal,
            max_payload_bytes,
            encoder: Encoder::new(4096),
            read_scratch: Vec::new(),
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn into_inner(self) -> H {
        self.hal
    }

    /// Proses satu frame dari depan `input`, append reply ke `out`.
    pub fn process(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<Progress, DispatchError> {
        let mut offset = 0;
        let Some(tag) = wire::pull::<u32>(input, &mut offset, input.len()) else {
            return Ok(Progress::NeedBytes(TAG_SIZE));
        };

        let header_size = required_header_bytes(tag)?;
        let kind = CommandKind::from_u32(tag).ok_or(DecodeError::UnknownCommand(tag))?;
        if kind.is_reply() {
            return Err(DispatchError::UnexpectedReply(kind));
        }

        let header_end = TAG_SIZE + header_size;
        let msg = match decode_kind(kind, &input[TAG_SIZE..], header_size) {
            Ok(msg) => msg,
            Err(e) if e.is_truncated() => return Ok(Progress::NeedBytes(header_end)),
            Err(e) => return Err(e.into()),
        };

        let payload_len = msg.payload_len().unwrap_or(0);
        if payload_len > self.max_payload_bytes as u64 {
            return Err(DispatchError::PayloadTooLarge {
                kind,
                len: payload_len,
                max: self.max_payload_bytes,
            });
        }

        let total = header_end + payload_len as usize;
        if input.len() < total {
            return Ok(Progress::NeedBytes(total));
        }

        debug!(?kind, bytes = total, "dispatch");
        self.execute(msg, &input[header_end..total], out)?;
        Ok(Progress::Consumed(total))
    }

    fn execute(&mut self, msg: Message, payload: &[u8], out: &mut Vec<u8>) -> Result<(), DispatchError> {
        let hal = &mut self.hal;
        let mut read_back: &[u8] = &[];

        let reply = match msg {
            Message::MemAlloc { size, alignment } => Message::MemAllocReply {
                address: hal.mem_alloc(size, alignment).unwrap_or(0),
            },
            Message::MemFree { address } => Message::MemFreeReply {
                success: hal.mem_free(address),
            },
            Message::MemWrite { dst, .. } => Message::MemWriteReply {
                success: hal.mem_write(dst, payload),
            },
            Message::MemRead { src, size } => {
                let mut success = false;
                if size <= self.max_payload_bytes as u64 {
                    self.read_scratch.clear();
                    self.read_scratch.resize(size as usize, 0);
                    success = hal.mem_read(src, &mut self.read_scratch);
                } else {
                    warn!(size, "memory read larger than payload limit refused");
                }
                if success {
                    read_back = &self.read_scratch;
                }
                Message::MemReadReply { success }
            }
            Message::MemFill { dst, size, .. } => Message::MemFillReply {
                success: hal.mem_fill(dst, payload, size),
            },
            Message::MemCopy { dst, src, size } => Message::MemCopyReply {
                success: hal.mem_copy(dst, src, size),
            },
            Message::ProgramFree { program } => Message::ProgramFreeReply {
                success: hal.program_free(program),
            },
            Message::ProgramLoad { .. } => Message::ProgramLoadReply {
                program: hal.program_load(payload).unwrap_or(0),
            },
            Message::FindKernel { program, .. } => Message::FindKernelReply {
                kernel: hal.find_kernel(program, payload).unwrap_or(0),
            },
            Message::KernelExec {
                program,
                kernel,
                num_args,
                nd_range,
                work_dim,
                args_data_size,
            } => {
                // Argument borrow dari payload; payload hidup sampai reply ditulis
                let args = decode_kernel_args(payload, num_args, payload.len())?
                    .exact(args_data_size as usize)?;
                Message::KernelExecReply {
                    success: hal.kernel_exec(program, kernel, &nd_range, work_dim, &args),
                }
            }
            Message::DeviceCreate => Message::DeviceCreateReply {
                success: hal.device_create(),
            },
            Message::DeviceDelete => Message::DeviceDeleteReply {
                success: hal.device_delete(),
            },
            other => return Err(DispatchError::UnexpectedReply(other.kind())),
        };

        self.encoder.reset();
        out.extend_from_slice(self.encoder.frame(&reply, read_back));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HostDevice;
    use crate::protocol::{
        decode_kind, encode_kernel_args, kernel_args_size, AddressSpace, KernelArg, NdRange,
        UNKNOWN_COMMAND,
    };

    fn dispatcher() -> Dispatcher<HostDevice> {
        let mut dev = HostDevice::with_capacity(64 * 1024).unwrap();
        dev.register_kernel("noop", |_| true);
        Dispatcher::new(dev)
    }

    fn frame(msg: &Message, payload: &[u8]) -> Vec<u8> {
        let mut encoder = Encoder::new(64);
        encoder.frame(msg, payload).to_vec()
    }

    /// Kirim satu frame lengkap, kembalikan reply yang sudah di-decode
    fn roundtrip(d: &mut Dispatcher<HostDevice>, msg: &Message, payload: &[u8]) -> (Message, Vec<u8>) {
        let input = frame(msg, payload);
        let mut out = Vec::new();
        assert_eq!(d.process(&input, &mut out).unwrap(), Progress::Consumed(input.len()));

        let mut offset = 0;
        let tag = wire::pull::<u32>(&out, &mut offset, out.len()).unwrap();
        let kind = CommandKind::from_u32(tag).unwrap();
        assert_eq!(kind, msg.kind().reply());
        let reply = decode_kind(kind, &out[TAG_SIZE..], kind.header_size()).unwrap();
        let extra = out[TAG_SIZE + kind.header_size()..].to_vec();
        (reply, extra)
    }

    #[test]
    fn test_need_bytes_progression() {
        let mut d = dispatcher();
        let input = frame(&Message::MemWrite { dst: 0x1_0000, size: 8 }, b"12345678");
        let mut out = Vec::new();

        assert_eq!(d.process(&input[..2], &mut out).unwrap(), Progress::NeedBytes(4));
        assert_eq!(d.process(&input[..10], &mut out).unwrap(), Progress::NeedBytes(20));
        assert_eq!(d.process(&input[..25], &mut out).unwrap(), Progress::NeedBytes(28));
        assert!(out.is_empty());

        assert_eq!(d.process(&input, &mut out).unwrap(), Progress::Consumed(28));
        assert_eq!(out.len(), TAG_SIZE + 4);
    }

    #[test]
    fn test_memory_roundtrip() {
        let mut d = dispatcher();
        let (reply, _) = roundtrip(&mut d, &Message::DeviceCreate, &[]);
        assert_eq!(reply, Message::DeviceCreateReply { success: true });

        let (reply, _) = roundtrip(&mut d, &Message::MemAlloc { size: 8, alignment: 8 }, &[]);
        let address = reply.handle().unwrap();
        assert_ne!(address, 0);

        let (reply, _) = roundtrip(&mut d, &Message::MemWrite { dst: address, size: 8 }, b"remoteHL");
        assert_eq!(reply.success(), Some(true));

        let (reply, data) = roundtrip(&mut d, &Message::MemRead { src: address, size: 8 }, &[]);
        assert_eq!(reply, Message::MemReadReply { success: true });
        assert_eq!(data, b"remoteHL");

        // Read gagal tidak membawa data
        let (reply, data) = roundtrip(&mut d, &Message::MemRead { src: address, size: 9 }, &[]);
        assert_eq!(reply, Message::MemReadReply { success: false });
        assert!(data.is_empty());
    }

    #[test]
    fn test_kernel_exec_dispatch() {
        let mut d = dispatcher();
        roundtrip(&mut d, &Message::DeviceCreate, &[]);

        let (reply, _) = roundtrip(&mut d, &Message::ProgramLoad { size: 4 }, b"noop");
        let program = reply.handle().unwrap();
        let (reply, _) = roundtrip(&mut d, &Message::FindKernel { program, name_size: 4 }, b"noop");
        let kernel = reply.handle().unwrap();
        assert_ne!(kernel, 0);

        let scalar = 5u32.to_ne_bytes();
        let args = [KernelArg::data(AddressSpace::GLOBAL, &scalar)];
        let blob = encode_kernel_args(&args);
        let exec = Message::KernelExec {
            program,
            kernel,
            num_args: 1,
            nd_range: NdRange {
                offset: [0; 3],
                global: [1, 1, 1],
                local: [1, 1, 1],
            },
            work_dim: 1,
            args_data_size: kernel_args_size(&args) as u32,
        };
        let (reply, _) = roundtrip(&mut d, &exec, &blob);
        assert_eq!(reply, Message::KernelExecReply { success: true });
    }

    #[test]
    fn test_global_size_overflow_fails_kernel() {
        let mut d = dispatcher();
        d.hal_mut().register_kernel("sized", |inv| inv.global_size().is_some());
        roundtrip(&mut d, &Message::DeviceCreate, &[]);

        let (reply, _) = roundtrip(&mut d, &Message::ProgramLoad { size: 5 }, b"sized");
        let program = reply.handle().unwrap();
        let (reply, _) = roundtrip(&mut d, &Message::FindKernel { program, name_size: 5 }, b"sized");
        let kernel = reply.handle().unwrap();

        let exec = |global: [u64; 3]| Message::KernelExec {
            program,
            kernel,
            num_args: 0,
            nd_range: NdRange {
                offset: [0; 3],
                global,
                local: [1, 1, 1],
            },
            work_dim: 2,
            args_data_size: 0,
        };
        let (reply, _) = roundtrip(&mut d, &exec([u64::MAX, 2, 1]), &[]);
        assert_eq!(reply, Message::KernelExecReply { success: false });

        // Dispatcher tetap hidup untuk command berikutnya
        let (reply, _) = roundtrip(&mut d, &exec([u64::MAX, 1, 1]), &[]);
        assert_eq!(reply, Message::KernelExecReply { success: true });

        assert!(d.into_inner().is_created());
    }

    #[test]
    fn test_argument_blob_mismatch_is_error() {
        let mut d = dispatcher();
        let args = [KernelArg::address(AddressSpace::GLOBAL, 4, 0x1_0000)];
        let mut blob = encode_kernel_args(&args);
        blob.extend_from_slice(&[0; 8]);

        let exec = Message::KernelExec {
            program: 1,
            kernel: 2,
            num_args: 1,
            nd_range: NdRange::default(),
            work_dim: 1,
            args_data_size: blob.len() as u32,
        };
        let input = frame(&exec, &blob);
        let err = d.process(&input, &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Decode(DecodeError::ArgumentBlobMismatch {
                declared: 32,
                consumed: 24
            })
        ));
    }

    #[test]
    fn test_protocol_violations() {
        let mut d = Dispatcher::with_max_payload(HostDevice::with_capacity(4096).unwrap(), 16);
        let mut out = Vec::new();

        let input = UNKNOWN_COMMAND.to_ne_bytes();
        assert!(matches!(
            d.process(&input, &mut out),
            Err(DispatchError::Decode(DecodeError::UnknownCommand(UNKNOWN_COMMAND)))
        ));

        let input = frame(&Message::MemFreeReply { success: true }, &[]);
        assert!(matches!(
            d.process(&input, &mut out),
            Err(DispatchError::UnexpectedReply(CommandKind::MemFreeReply))
        ));

        // Ditolak dari header saja, sebelum payload tiba
        let input = frame(&Message::ProgramLoad { size: 17 }, &[]);
        assert!(matches!(
            d.process(&input, &mut out),
            Err(DispatchError::PayloadTooLarge { len: 17, max: 16, .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut d = dispatcher();
        let mut input = frame(&Message::DeviceCreate, &[]);
        input.extend(frame(&Message::MemAlloc { size: 64, alignment: 64 }, &[]));

        let mut out = Vec::new();
        let Progress::Consumed(n) = d.process(&input, &mut out).unwrap() else {
            panic!("first frame incomplete");
        };
        assert_eq!(n, TAG_SIZE);
        assert_eq!(
            d.process(&input[n..], &mut out).unwrap(),
            Progress::Consumed(TAG_SIZE + 16)
        );
        assert_eq!(out.len(), (TAG_SIZE + 4) + (TAG_SIZE + 8));
    }
}
