//! Wire Value Codec
//!
//! Baca/tulis integer fixed-width langsung dari byte buffer.
//! Semua bounds-check di decoder terjadi di sini, tidak di tempat lain.
//!
//! Byte order mengikuti native integer representation: encoder dan decoder
//! harus berjalan di mesin dengan endianness yang sama.

/// Value yang punya representasi fixed-width di wire
pub trait WireValue: Sized + Copy {
    /// Ukuran di wire dalam bytes
    const SIZE: usize;

    /// Decode dari tepat `SIZE` bytes
    fn read(bytes: &[u8]) -> Self;

    /// Append representasi wire ke `out`
    fn write(self, out: &mut Vec<u8>);
}

impl WireValue for u32 {
    const SIZE: usize = 4;

    #[inline(always)]
    fn read(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        u32::from_ne_bytes(raw)
    }

    #[inline(always)]
    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl WireValue for u64 {
    const SIZE: usize = 8;

    #[inline(always)]
    fn read(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        u64::from_ne_bytes(raw)
    }

    #[inline(always)]
    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

/// Boolean selalu 32-bit di wire, bukan single byte.
impl WireValue for bool {
    const SIZE: usize = 4;

    #[inline(always)]
    fn read(bytes: &[u8]) -> Self {
        u32::read(bytes) != 0
    }

    #[inline(always)]
    fn write(self, out: &mut Vec<u8>) {
        u32::from(self).write(out);
    }
}

/// Pull satu value dari `buf` di `offset`.
///
/// Returns `None` (offset tidak berubah) jika `offset + T::SIZE > limit`.
/// `limit` di-clamp ke `buf.len()` sehingga tidak pernah out-of-bounds.
#[inline(always)]
pub fn pull<T: WireValue>(buf: &[u8], offset: &mut usize, limit: usize) -> Option<T> {
    let limit = limit.min(buf.len());
    let end = offset.checked_add(T::SIZE)?;
    if end > limit {
        return None;
    }

    let value = T::read(&buf[*offset..end]);
    *offset = end;
    Some(value)
}

/// Borrow `len` bytes dari `buf` di `offset` (zero-copy).
#[inline(always)]
pub fn pull_bytes<'a>(
    buf: &'a [u8],
    offset: &mut usize,
    len: usize,
    limit: usize,
) -> Option<&'a [u8]> {
    let limit = limit.min(buf.len());
    let end = offset.checked_add(len)?;
    if end > limit {
        return None;
    }

    let bytes = &buf[*offset..end];
    *offset = end;
    Some(bytes)
}

/// Append satu value ke `out`
#[inline(always)]
pub fn push<T: WireValue>(value: T, out: &mut Vec<u8>) {
    value.write(out);
}
