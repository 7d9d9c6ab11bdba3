//! Remote HAL - Binary Command Protocol untuk Device Terpisah
//!
//! Arsitektur:
//! - Protocol: fixed-layout header per command, satu tabel field bersama
//! - Zero-Copy: inline kernel argument di-borrow dari buffer asal
//! - Core: memory device di-mmap, HAL loopback di dalam proses
//! - Network: mio server yang men-dispatch command ke `Hal`

pub mod core;
pub mod hal;
pub mod network;
pub mod protocol;

pub use hal::Hal;
