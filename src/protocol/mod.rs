//! Protocol Layer: Remote HAL Binary Encoding
//!
//! Prinsip desain:
//! - Fixed-size headers: ukuran header murni fungsi dari command kind
//! - Satu tabel field per command, dipakai encoder dan decoder
//! - Zero-copy: inline kernel argument di-borrow dari buffer asal
//! - Bounds-checked: setiap field pull dicek terhadap limit

mod command;
mod decoder;
mod encoder;
mod error;
mod message;
pub mod wire;

pub use command::{required_header_bytes, CommandKind, FieldType, MAX_HEADER_FIELDS, UNKNOWN_COMMAND};
pub use decoder::{decode, decode_kernel_args, decode_kind, DecodedArgs, Decoder, ARG_ENTRY_MIN_SIZE};
pub use encoder::{
    encode, encode_into, encode_kernel_args, encode_kernel_args_into, kernel_args_size, Encoder,
};
pub use error::DecodeError;
pub use message::{
    Address, AddressSpace, ArgKind, ArgValue, HeaderFields, KernelArg, KernelHandle, Message,
    NdRange, ProgramHandle,
};

/// Ukuran tag command di outer framing
pub const TAG_SIZE: usize = 4;
