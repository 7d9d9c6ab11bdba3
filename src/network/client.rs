//! Remote HAL Client (caller side)
//!
//! Setiap call mengikuti state machine yang sama:
//! BuildHeader → AppendOutOfBandPayload → Send →
//! AwaitReplyHeaderBytes → DecodeReply.
//! Blocking, satu command in-flight per client.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use thiserror::Error;

use crate::protocol::{
    decode_kind, kernel_args_size, Address, CommandKind, DecodeError, Encoder, KernelArg,
    KernelHandle, Message, NdRange, ProgramHandle, TAG_SIZE,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed reply: {0}")]
    Decode(#[from] DecodeError),

    #[error("expected {expected:?}, got {got:?}")]
    UnexpectedReply {
        expected: CommandKind,
        got: CommandKind,
    },

    #[error("kernel argument blob of {0} bytes does not fit the u32 size field")]
    ArgumentsTooLarge(usize),
}

/// Client untuk device remote
pub struct RemoteHal<S> {
    stream: S,
    encoder: Encoder,
    reply: Vec<u8>,
}

impl RemoteHal<TcpStream> {
    /// Connect ke `hal_server`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> RemoteHal<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            encoder: Encoder::new(4096),
            reply: Vec::with_capacity(16),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn send(&mut self, msg: &Message, payload: &[u8]) -> Result<(), ClientError> {
        self.encoder.reset();
        let frame = self.encoder.frame(msg, payload);
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn await_reply(&mut self, request: CommandKind) -> Result<Message, ClientError> {
        let mut tag = [0u8; TAG_SIZE];
        self.stream.read_exact(&mut tag)?;
        let tag = u32::from_ne_bytes(tag);

        let expected = request.reply();
        let got = CommandKind::from_u32(tag).ok_or(DecodeError::UnknownCommand(tag))?;
        if got != expected {
            return Err(ClientError::UnexpectedReply { expected, got });
        }

        let size = got.header_size();
        self.reply.resize(size, 0);
        self.stream.read_exact(&mut self.reply[..size])?;
        Ok(decode_kind(got, &self.reply, size)?)
    }

    fn call(&mut self, msg: &Message, payload: &[u8]) -> Result<Message, ClientError> {
        self.send(msg, payload)?;
        self.await_reply(msg.kind())
    }

    fn call_bool(&mut self, msg: &Message, payload: &[u8]) -> Result<bool, ClientError> {
        let reply = self.call(msg, payload)?;
        reply.success().ok_or(ClientError::UnexpectedReply {
            expected: msg.kind().reply(),
            got: reply.kind(),
        })
    }

    /// Handle 0 dari device berarti gagal
    fn call_handle(&mut self, msg: &Message, payload: &[u8]) -> Result<Option<u64>, ClientError> {
        let reply = self.call(msg, payload)?;
        let handle = reply.handle().ok_or(ClientError::UnexpectedReply {
            expected: msg.kind().reply(),
            got: reply.kind(),
        })?;
        Ok(if handle == 0 { None } else { Some(handle) })
    }

    pub fn device_create(&mut self) -> Result<bool, ClientError> {
        self.call_bool(&Message::DeviceCreate, &[])
    }

    pub fn device_delete(&mut self) -> Result<bool, ClientError> {
        self.call_bool(&Message::DeviceDelete, &[])
    }

    pub fn mem_alloc(&mut self, size: u64, alignment: u64) -> Result<Option<Address>, ClientError> {
        self.call_handle(&Message::MemAlloc { size, alignment }, &[])
    }

    pub fn mem_free(&mut self, address: Address) -> Result<bool, ClientError> {
        self.call_bool(&Message::MemFree { address }, &[])
    }

    pub fn mem_write(&mut self, dst: Address, data: &[u8]) -> Result<bool, ClientError> {
        let msg = Message::MemWrite {
            dst,
            size: data.len() as u64,
        };
        self.call_bool(&msg, data)
    }

    /// Returns `None` jika device menolak read
    pub fn mem_read(&mut self, src: Address, size: u64) -> Result<Option<Vec<u8>>, ClientError> {
        if !self.call_bool(&Message::MemRead { src, size }, &[])? {
            return Ok(None);
        }

        // Reply sukses diikuti tepat `size` bytes
        let mut data = vec![0u8; size as usize];
        self.stream.read_exact(&mut data)?;
        Ok(Some(data))
    }

    pub fn mem_fill(&mut self, dst: Address, pattern: &[u8], size: u64) -> Result<bool, ClientError> {
        let msg = Message::MemFill {
            dst,
            pattern_size: pattern.len() as u64,
            size,
        };
        self.call_bool(&msg, pattern)
    }

    pub fn mem_copy(&mut self, dst: Address, src: Address, size: u64) -> Result<bool, ClientError> {
        self.call_bool(&Message::MemCopy { dst, src, size }, &[])
    }

    pub fn program_load(&mut self, binary: &[u8]) -> Result<Option<ProgramHandle>, ClientError> {
        let msg = Message::ProgramLoad {
            size: binary.len() as u64,
        };
        self.call_handle(&msg, binary)
    }

    pub fn program_free(&mut self, program: ProgramHandle) -> Result<bool, ClientError> {
        self.call_bool(&Message::ProgramFree { program }, &[])
    }

    pub fn find_kernel(
        &mut self,
        program: ProgramHandle,
        name: &str,
    ) -> Result<Option<KernelHandle>, ClientError> {
        let msg = Message::FindKernel {
            program,
            name_size: name.len() as u64,
        };
        self.call_handle(&msg, name.as_bytes())
    }

    pub fn kernel_exec(
        &mut self,
        program: ProgramHandle,
        kernel: KernelHandle,
        nd_range: &NdRange,
        work_dim: u32,
        args: &[KernelArg<'_>],
    ) -> Result<bool, ClientError> {
        let blob_size = kernel_args_size(args);
        let args_data_size =
            u32::try_from(blob_size).map_err(|_| ClientError::ArgumentsTooLarge(blob_size))?;

        let msg = Message::KernelExec {
            program,
            kernel,
            num_args: args.len() as u32,
            nd_range: *nd_range,
            work_dim,
            args_data_size,
        };

        self.encoder.reset();
        let frame = self.encoder.frame_kernel_exec(&msg, args);
        self.stream.write_all(frame)?;
        self.stream.flush()?;

        let reply = self.await_reply(CommandKind::KernelExec)?;
        reply.success().ok_or(ClientError::UnexpectedReply {
            expected: CommandKind::KernelExecReply,
            got: reply.kind(),
        })
    }
}
