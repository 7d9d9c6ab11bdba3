//! Network Layer: Transport untuk Remote HAL
//!
//! Menggunakan mio untuk cross-platform async I/O di sisi device,
//! dan blocking TcpStream di sisi caller.
//!
//! Outer framing (bukan bagian dari codec): setiap command dan reply
//! diawali tag u32, lalu header fixed, lalu out-of-band payload.

mod client;
mod connection;
mod dispatcher;
mod server;

pub use client::{ClientError, RemoteHal};
pub use connection::Connection;
pub use dispatcher::{DispatchError, Dispatcher, Progress, DEFAULT_MAX_PAYLOAD_BYTES};
pub use server::{Server, ServerConfig};
