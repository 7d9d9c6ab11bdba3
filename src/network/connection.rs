//! Connection handling dengan buffered I/O
//!
//! Read buffer menampung bytes sampai satu command lengkap tersedia
//! (transport bisa mengirim kurang dari satu message per read).
//! Generic atas `Read + Write` supaya bisa dipakai dengan mio stream
//! maupun stream in-memory di test.

use std::io::{self, Read, Write};

/// Initial buffer sizes - tuned untuk typical command sizes
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64KB
const WRITE_BUFFER_SIZE: usize = 64 * 1024; // 64KB

/// Buffered non-blocking connection
pub struct Connection<S> {
    stream: S,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    write_pos: usize,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap stream dengan buffered I/O
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
            write_buffer: vec![0u8; WRITE_BUFFER_SIZE],
            read_pos: 0,
            read_len: 0,
            write_pos: 0,
        }
    }

    /// Read data ke internal buffer sampai `WouldBlock`.
    ///
    /// mio edge-triggered: readable event tidak datang lagi sebelum
    /// socket di-drain. Returns jumlah bytes yang tersedia untuk dibaca.
    pub fn fill_read_buffer(&mut self) -> io::Result<usize> {
        self.compact();

        loop {
            if self.read_len == self.read_buffer.len() {
                let grow = self.read_buffer.len().max(READ_BUFFER_SIZE);
                self.read_buffer.resize(self.read_buffer.len() + grow, 0);
            }

            match self.stream.read(&mut self.read_buffer[self.read_len..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "Connection closed",
                    ))
                }
                Ok(n) => self.read_len += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(self.read_len - self.read_pos)
    }

    /// Geser bytes yang belum dikonsumsi ke awal buffer
    fn compact(&mut self) {
        if self.read_pos > 0 {
            let remaining = self.read_len - self.read_pos;
            if remaining > 0 {
                self.read_buffer.copy_within(self.read_pos..self.read_len, 0);
            }
            self.read_len = remaining;
            self.read_pos = 0;
        }
    }

    /// Pastikan read buffer bisa menampung satu message `total` bytes
    pub fn reserve_for(&mut self, total: usize) {
        self.compact();
        if total > self.read_buffer.len() {
            self.read_buffer.resize(total, 0);
        }
    }

    /// Get readable data slice (zero-copy)
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..self.read_len]
    }

    /// Consume n bytes dari read buffer
    #[inline(always)]
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.read_len - self.read_pos);
    }

    /// Queue data untuk write (copy ke write buffer)
    pub fn queue_write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.write_pos + data.len() > self.write_buffer.len() {
            // Flush dulu jika buffer penuh
            self.flush_write_buffer()?;
        }

        if self.write_pos + data.len() > self.write_buffer.len() {
            // Socket masih penuh atau data terlalu besar: perbesar buffer
            self.write_buffer.resize(self.write_pos + data.len(), 0);
        }

        self.write_buffer[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();

        Ok(())
    }

    /// Flush write buffer ke stream
    pub fn flush_write_buffer(&mut self) -> io::Result<()> {
        if self.write_pos == 0 {
            return Ok(());
        }

        let mut written = 0;
        while written < self.write_pos {
            match self.stream.write(&self.write_buffer[written..self.write_pos]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "Failed to write to socket",
                    ));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        // Partial write, compact buffer
        if written > 0 {
            self.write_buffer.copy_within(written..self.write_pos, 0);
            self.write_pos -= written;
        }
        Ok(())
    }

    /// Get underlying stream untuk polling
    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes pending in write buffer
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_pos
    }
}
