//! Protocol errors

use thiserror::Error;

/// Hasil gagal dari decode header atau kernel-argument blob.
///
/// Tidak ada retry di dalam codec: caller yang memutuskan apakah
/// menunggu bytes tambahan atau memutus koneksi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Tag tidak ada di command catalog
    #[error("unknown command tag {0:#x}")]
    UnknownCommand(u32),

    /// Buffer lebih pendek dari yang dibutuhkan
    #[error("truncated message: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Kernel-argument decode tidak mengkonsumsi tepat `args_data_size` bytes
    #[error("argument blob declared {declared} bytes but entries consumed {consumed}")]
    ArgumentBlobMismatch { declared: usize, consumed: usize },
}

impl DecodeError {
    /// `true` jika caller cukup menunggu bytes tambahan lalu retry.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        matches!(self, DecodeError::Truncated { .. })
    }
}
