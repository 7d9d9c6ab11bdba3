//! Remote HAL Server dengan event-driven I/O
//!
//! Menggunakan mio untuk non-blocking I/O multiplexing.
//! Satu HAL dipakai bersama oleh semua koneksi; command dari satu
//! koneksi dieksekusi sesuai urutan tiba.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::dispatcher::{Dispatcher, Progress, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::hal::Hal;

const SERVER_TOKEN: Token = Token(0);
const MAX_CONNECTIONS: usize = 1024;
const EVENTS_CAPACITY: usize = 1024;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Ukuran arena memory device dalam MB
    pub device_memory_mb: usize,
    /// File backing untuk memory device; `None` berarti anonymous
    pub device_memory_path: Option<String>,
    pub max_payload_bytes: usize,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9999".to_string(),
            device_memory_mb: 64,
            device_memory_path: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            verbose: false,
        }
    }
}

impl ServerConfig {
    pub fn device_memory_bytes(&self) -> usize {
        self.device_memory_mb * 1024 * 1024
    }
}

/// Remote HAL Server
///
/// Event-driven server dengan:
/// - Non-blocking I/O (epoll/kqueue/IOCP)
/// - Read buffer per koneksi untuk partial reads
/// - Dispatcher bersama yang memegang HAL
pub struct Server<H> {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection<TcpStream>>,
    next_token: usize,
    dispatcher: Dispatcher<H>,
    // Reply buffer, di-reuse antar event
    replies: Vec<u8>,
}

impl<H: Hal> Server<H> {
    /// Membuat server baru
    pub fn bind(config: &ServerConfig, hal: H) -> io::Result<Self> {
        let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid bind address {:?}: {}", config.bind_addr, e),
            )
        })?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: HashMap::with_capacity(64),
            next_token: 1,
            dispatcher: Dispatcher::with_max_payload(hal, config.max_payload_bytes),
            replies: Vec::with_capacity(64 * 1024),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn hal(&self) -> &H {
        self.dispatcher.hal()
    }

    /// Run server event loop selamanya
    pub fn run(&mut self) -> io::Result<()> {
        let never = AtomicBool::new(false);
        self.run_until(&never)
    }

    /// Run server event loop sampai `shutdown` di-set
    pub fn run_until(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        info!("remote HAL server listening on {}", self.local_addr()?);

        while !shutdown.load(Ordering::Relaxed) {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    SERVER_TOKEN => self.accept_connections()?,
                    token => {
                        if event.is_readable() || event.is_read_closed() {
                            self.handle_read(token);
                        }
                        if event.is_writable() {
                            self.handle_write(token);
                        }
                    }
                }
            }
        }

        info!("remote HAL server stopped");
        Ok(())
    }

    /// Accept new connections
    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.connections.len() >= MAX_CONNECTIONS {
                        warn!("max connections reached, rejecting {}", addr);
                        continue;
                    }

                    // Disable Nagle's algorithm untuk lower latency
                    stream.set_nodelay(true)?;
                    tune_socket_buffers(&stream);

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;

                    self.connections.insert(token, Connection::new(stream));
                    info!("new connection from {} (token: {:?})", addr, token);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Handle readable event: drain socket, dispatch semua frame lengkap
    fn handle_read(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let mut closed = false;
        match conn.fill_read_buffer() {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                // Peer menutup koneksi: command yang sudah lengkap tetap dieksekusi
                closed = true;
            }
            Err(e) => {
                warn!("read error on {:?}: {}", token, e);
                self.close(token);
                return;
            }
        }

        self.replies.clear();
        loop {
            match self.dispatcher.process(conn.readable(), &mut self.replies) {
                Ok(Progress::Consumed(n)) => conn.consume(n),
                Ok(Progress::NeedBytes(total)) => {
                    conn.reserve_for(total);
                    break;
                }
                Err(e) => {
                    warn!("protocol violation on {:?}: {}", token, e);
                    closed = true;
                    break;
                }
            }
        }

        if !self.replies.is_empty() {
            debug!(bytes = self.replies.len(), "queue replies for {:?}", token);
            let result = conn
                .queue_write(&self.replies)
                .and_then(|_| conn.flush_write_buffer());
            if let Err(e) = result {
                warn!("write error on {:?}: {}", token, e);
                closed = true;
            }
        }

        if closed {
            self.close(token);
        }
    }

    /// Handle writable event
    fn handle_write(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if let Err(e) = conn.flush_write_buffer() {
            warn!("write error on {:?}: {}", token, e);
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            if conn.write_pending() > 0 {
                // Best effort: kirim sisa reply sebelum socket ditutup
                let _ = conn.flush_write_buffer();
            }
            let _ = self.poll.registry().deregister(conn.stream_mut());
            info!("connection {:?} closed", token);
        }
    }
}

/// Set socket buffer sizes untuk throughput.
/// Ignore errors - not all platforms support this.
#[cfg(unix)]
fn tune_socket_buffers(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let optval: libc::c_int = 256 * 1024; // 256KB
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // SAFETY: fd valid selama stream hidup, optval pointer ke c_int lokal
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
}

#[cfg(not(unix))]
fn tune_socket_buffers(_stream: &TcpStream) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.device_memory_bytes(), 64 * 1024 * 1024);
        assert!(config.device_memory_path.is_none());
    }

    #[test]
    fn test_bind_rejects_bad_address() {
        let config = ServerConfig {
            bind_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        let hal = crate::core::HostDevice::with_capacity(4096).unwrap();
        let err = Server::bind(&config, hal).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
