use std::{
    borrow::Cow,
    io::{Read, Seek, SeekFrom, Write},
};

use tempfile::SpooledTempFile;

/// Default threshold before a [`SpooledBuffer`] rolls over to disk.
pub const SPOOL_THRESHOLD: usize = 512 * 1024;

pub fn to_ascii_uppercase_cow(text: &str) -> Cow<'_, str> {
    if text.chars().any(|c| c.is_ascii_lowercase()) {
        Cow::Owned(text.to_ascii_uppercase())
    } else {
        Cow::Borrowed(text)
    }
}

pub fn to_ascii_lowercase_cow(text: &str) -> Cow<'_, str> {
    if text.chars().any(|c| c.is_ascii_uppercase()) {
        Cow::Owned(text.to_ascii_lowercase())
    } else {
        Cow::Borrowed(text)
    }
}

/// Seekable scratch buffer that stays in memory up to a threshold and
/// rolls over to an unnamed temporary file beyond it.
///
/// Used when a record body of unknown length must be consumed before its
/// `Content-Length` and digests can be written.
pub struct SpooledBuffer {
    inner: SpooledTempFile,
    len: u64,
}

impl SpooledBuffer {
    pub fn new() -> Self {
        Self::with_threshold(SPOOL_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            inner: SpooledTempFile::new(threshold),
            len: 0,
        }
    }

    /// Total bytes written.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Seeks back to the start for reading.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

impl Default for SpooledBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for SpooledBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Read for SpooledBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spooled_buffer_roll_over() {
        let mut buf = SpooledBuffer::with_threshold(8);

        buf.write_all(b"0123456789abcdef").unwrap();
        assert_eq!(buf.len(), 16);

        buf.rewind().unwrap();

        let mut out = Vec::new();
        buf.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123456789abcdef");
    }

    #[test]
    fn test_case_cow() {
        assert!(matches!(to_ascii_uppercase_cow("ABC"), Cow::Borrowed(_)));
        assert!(matches!(to_ascii_uppercase_cow("abc"), Cow::Owned(_)));
        assert_eq!(to_ascii_lowercase_cow("MiXeD"), "mixed");
    }
}
