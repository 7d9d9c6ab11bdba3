//! Remote HAL Client - Smoke Driver
//!
//! Menjalankan satu skenario lengkap ke `hal_server`:
//! device create → alloc → write/fill/copy/read → program load →
//! find kernel → kernel exec → free → device delete.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin hal_client -- --host 127.0.0.1:9999 --elements 1024
//! ```

use std::process;
use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use remote_hal::network::{ClientError, RemoteHal};
use remote_hal::protocol::{AddressSpace, KernelArg, NdRange};

/// Client configuration
struct ClientConfig {
    host: String,
    elements: u64,
    verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:9999".to_string(),
            elements: 1024,
            verbose: false,
        }
    }
}

fn to_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn run_client(config: &ClientConfig) -> Result<bool, ClientError> {
    let mut hal = RemoteHal::connect(config.host.as_str())?;
    info!("connected to {}", config.host);

    let start = Instant::now();
    if !hal.device_create()? {
        error!("device create refused");
        return Ok(false);
    }

    let n = config.elements;
    let bytes = n * 4;
    let (Some(a), Some(b), Some(out)) = (
        hal.mem_alloc(bytes, 64)?,
        hal.mem_alloc(bytes, 64)?,
        hal.mem_alloc(bytes, 64)?,
    ) else {
        error!("device allocation failed for {} bytes", bytes);
        return Ok(false);
    };
    info!("allocated a={:#x} b={:#x} out={:#x}", a, b, out);

    let lhs: Vec<u32> = (0..n as u32).collect();
    hal.mem_write(a, &to_bytes(&lhs))?;
    hal.mem_fill(b, &7u32.to_ne_bytes(), bytes)?;
    hal.mem_fill(out, &[0u8], bytes)?;

    let Some(program) = hal.program_load(b"vector_add_u32\n")? else {
        error!("program load failed");
        return Ok(false);
    };
    let Some(kernel) = hal.find_kernel(program, "vector_add_u32")? else {
        error!("kernel vector_add_u32 not found");
        return Ok(false);
    };

    let args = [
        KernelArg::address(AddressSpace::GLOBAL, bytes, a),
        KernelArg::address(AddressSpace::GLOBAL, bytes, b),
        KernelArg::address(AddressSpace::GLOBAL, bytes, out),
    ];
    let nd_range = NdRange {
        offset: [0; 3],
        global: [n, 1, 1],
        local: [n.min(64), 1, 1],
    };
    let executed = hal.kernel_exec(program, kernel, &nd_range, 1, &args)?;

    let result = hal.mem_read(out, bytes)?;
    let expected = to_bytes(&lhs.iter().map(|v| v + 7).collect::<Vec<_>>());
    let ok = executed && result.as_deref() == Some(expected.as_slice());

    hal.program_free(program)?;
    for address in [a, b, out] {
        hal.mem_free(address)?;
    }
    hal.device_delete()?;

    info!(
        "vector_add_u32 over {} elements: {} ({:.3} ms round trip total)",
        n,
        if ok { "OK" } else { "MISMATCH" },
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(ok)
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    config.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--elements" | "-n" => {
                if i + 1 < args.len() {
                    config.elements = args[i + 1].parse().unwrap_or(1024);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("Remote HAL Client\n");
                println!("Usage: hal_client [OPTIONS]\n");
                println!("Options:");
                println!("      --host <ADDR>       Server address (default: 127.0.0.1:9999)");
                println!("  -n, --elements <N>      Vector length (default: 1024)");
                println!("  -v, --verbose           Debug logging (RUST_LOG overrides)");
                println!("  -h, --help              Show this help");
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

    match run_client(&config) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            error!("client error: {}", e);
            process::exit(1);
        }
    }
}
