//! Remote HAL Server Binary
//!
//! Melayani satu `HostDevice` (memory di-mmap) lewat TCP:
//! - TCP_NODELAY enabled
//! - Partial reads di-buffer sampai command lengkap
//! - Builtin kernel `vector_add_u32` untuk smoke test
//!
//! Usage:
//!   cargo run --release --bin hal_server [OPTIONS]

use std::process;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use remote_hal::core::{DeviceMemory, HostDevice, KernelInvocation};
use remote_hal::network::{Server, ServerConfig};

/// out[i] = a[i] + b[i] untuk u32, args: (a, b, out) address
fn vector_add_u32(inv: &mut KernelInvocation<'_, '_>) -> bool {
    let addresses: Vec<u64> = inv.args.iter().filter_map(|arg| arg.as_address()).collect();
    let &[a, b, out] = addresses.as_slice() else {
        return false;
    };
    let Some(bytes) = inv.global_size().and_then(|n| n.checked_mul(4)) else {
        return false;
    };

    let (Some(lhs), Some(rhs)) = (
        inv.memory.slice(a, bytes).map(|s| s.to_vec()),
        inv.memory.slice(b, bytes).map(|s| s.to_vec()),
    ) else {
        return false;
    };
    let Some(dst) = inv.memory.slice_mut(out, bytes) else {
        return false;
    };

    for ((d, l), r) in dst
        .chunks_exact_mut(4)
        .zip(lhs.chunks_exact(4))
        .zip(rhs.chunks_exact(4))
    {
        let l = u32::from_ne_bytes([l[0], l[1], l[2], l[3]]);
        let r = u32::from_ne_bytes([r[0], r[1], r[2], r[3]]);
        d.copy_from_slice(&l.wrapping_add(r).to_ne_bytes());
    }
    true
}

fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let capacity = config.device_memory_bytes();
    let memory = match &config.device_memory_path {
        Some(path) => DeviceMemory::open(path, capacity)?,
        None => DeviceMemory::anonymous(capacity)?,
    };
    info!(
        "device memory: {} MB ({})",
        config.device_memory_mb,
        config.device_memory_path.as_deref().unwrap_or("anonymous")
    );

    let mut device = HostDevice::new(memory);
    device.register_kernel("vector_add_u32", vector_add_u32);

    let mut server = Server::bind(&config, device)?;
    server.run()
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].clone();
                    i += 1;
                }
            }
            "--memory" | "-m" => {
                if i + 1 < args.len() {
                    config.device_memory_mb = args[i + 1].parse().unwrap_or(64);
                    i += 1;
                }
            }
            "--memory-file" => {
                if i + 1 < args.len() {
                    config.device_memory_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--max-payload" => {
                if i + 1 < args.len() {
                    if let Ok(mb) = args[i + 1].parse::<usize>() {
                        config.max_payload_bytes = mb * 1024 * 1024;
                    }
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("Remote HAL Server\n");
                println!("Usage: hal_server [OPTIONS]\n");
                println!("Options:");
                println!("  -b, --bind <ADDR>         Bind address (default: 0.0.0.0:9999)");
                println!("  -m, --memory <MB>         Device memory size in MB (default: 64)");
                println!("      --memory-file <PATH>  Back device memory with a file");
                println!("      --max-payload <MB>    Max out-of-band payload per command (default: 64)");
                println!("  -v, --verbose             Debug logging (RUST_LOG overrides)");
                println!("  -h, --help                Show this help");
                process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() {
    let config = parse_args();

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run_server(config) {
        error!("server error: {}", e);
        process::exit(1);
    }
}
