//! Buffered reading primitives for archive streams.
use std::io::{BufRead, Read, Write};

/// Default block size for source reads.
pub const BLOCK_SIZE: usize = 16384;

/// Trait for tracking the number of bytes consumed from a stream.
pub trait LogicalPosition {
    fn logical_position(&self) -> u64;
}

/// Buffering reader that exposes its buffer and tracks consumed bytes.
///
/// Unlike `std::io::BufReader`, the buffer can grow beyond the block size
/// so a caller may accumulate data until a deliminator is found.
pub struct BufferReader<R: Read> {
    reader: R,
    block_size: usize,
    buffer: Vec<u8>,
    buffer_position: usize,
    logical_position: u64,
}

impl<R: Read> BufferReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_block_size(reader, BLOCK_SIZE)
    }

    pub fn with_block_size(reader: R, block_size: usize) -> Self {
        Self {
            reader,
            block_size,
            buffer: Vec::new(),
            buffer_position: 0,
            logical_position: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns the unconsumed portion of the buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[self.buffer_position..]
    }

    /// Bytes available without another source read.
    pub fn rem_length(&self) -> usize {
        self.buffer.len() - self.buffer_position
    }

    pub fn fill_buffer(&mut self) -> std::io::Result<usize> {
        let original_len = self.buffer.len();
        self.buffer.resize(original_len + self.block_size, 0);

        match self.reader.read(&mut self.buffer[original_len..]) {
            Ok(read_len) => {
                self.buffer.truncate(original_len + read_len);
                Ok(read_len)
            }
            Err(error) => {
                self.buffer.truncate(original_len);
                Err(error)
            }
        }
    }

    pub fn fill_buffer_if_empty(&mut self) -> std::io::Result<usize> {
        if self.rem_length() == 0 {
            self.fill_buffer()
        } else {
            Ok(0)
        }
    }

    fn compact_buffer(&mut self) {
        self.buffer.drain(..self.buffer_position);
        self.buffer_position = 0;
    }

    fn read_using_buffer(&mut self, mut buf: &mut [u8]) -> std::io::Result<usize> {
        self.fill_buffer_if_empty()?;

        let range = self.buffer_position..self.buffer.len().min(self.buffer_position + buf.len());
        let write_len = range.len();

        buf.write_all(&self.buffer[range])?;
        self.buffer_position += write_len;

        self.clean_up_buffer();

        Ok(write_len)
    }

    fn clean_up_buffer(&mut self) {
        if self.buffer_position >= self.buffer.len() {
            self.buffer.clear();
            self.buffer_position = 0;
        } else if self.buffer_position > self.block_size {
            self.compact_buffer();
        }
    }
}

impl<R: Read> Read for BufferReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read_len = if buf.len() >= self.block_size && self.rem_length() == 0 {
            self.reader.read(buf)
        } else {
            self.read_using_buffer(buf)
        }?;

        self.logical_position += read_len as u64;
        Ok(read_len)
    }
}

impl<R: Read> BufRead for BufferReader<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.fill_buffer_if_empty()?;

        Ok(self.buffer())
    }

    fn consume(&mut self, amt: usize) {
        self.buffer_position += amt;
        self.logical_position += amt as u64;
        self.clean_up_buffer();
    }
}

impl<R: Read> LogicalPosition for BufferReader<R> {
    fn logical_position(&self) -> u64 {
        self.logical_position
    }
}

/// Reads one line (through the trailing `\n`) without consuming more than
/// `limit` bytes from the reader.
///
/// The line bytes are appended to `out`. Returns the number of bytes
/// appended; zero means end of stream or an exhausted limit.
pub fn read_line_limited<R: BufRead + ?Sized>(
    reader: &mut R,
    limit: u64,
    out: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let mut total = 0u64;

    while total < limit {
        let buf = reader.fill_buf()?;

        if buf.is_empty() {
            break;
        }

        let upper = buf.len().min((limit - total) as usize);
        let window = &buf[..upper];

        match memchr_newline(window) {
            Some(index) => {
                out.extend_from_slice(&window[..=index]);
                reader.consume(index + 1);
                total += (index + 1) as u64;
                break;
            }
            None => {
                out.extend_from_slice(window);
                reader.consume(upper);
                total += upper as u64;
            }
        }
    }

    Ok(total as usize)
}

fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_buffer_reader() {
        let mut source = Vec::new();
        let data_len = 50000;

        for i in 0..data_len {
            source.push(i as u8);
        }

        let mut r = BufferReader::new(Cursor::new(source));
        let mut actual = Vec::new();
        let mut remain_len = data_len;
        let mut buf = Vec::new();

        for buf_size in [10, 2000, 4000, 16384, 16384, 5000].iter().cycle() {
            if remain_len == 0 {
                break;
            }
            let read_len = (*buf_size).min(remain_len);
            buf.resize(read_len, 0);
            r.read_exact(&mut buf).unwrap();

            actual.extend_from_slice(&buf);
            remain_len -= read_len;
        }

        assert_eq!(r.logical_position(), data_len as u64);

        let source = r.into_inner().into_inner();

        assert_eq!(source, actual);
    }

    #[test]
    fn test_read_line_limited() {
        let mut r = BufferReader::new(Cursor::new(b"abc\r\ndef\r\n".to_vec()));

        let mut line = Vec::new();
        let len = read_line_limited(&mut r, 100, &mut line).unwrap();
        assert_eq!(len, 5);
        assert_eq!(line, b"abc\r\n");

        line.clear();
        read_line_limited(&mut r, 100, &mut line).unwrap();
        assert_eq!(line, b"def\r\n");

        line.clear();
        let len = read_line_limited(&mut r, 100, &mut line).unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_read_line_limited_budget() {
        let mut r = BufferReader::new(Cursor::new(b"abcdefgh\r\n".to_vec()));

        let mut line = Vec::new();
        let len = read_line_limited(&mut r, 4, &mut line).unwrap();
        assert_eq!(len, 4);
        assert_eq!(line, b"abcd");
        assert_eq!(r.logical_position(), 4);
    }

    #[test]
    fn test_buffer_reader_small_block() {
        let mut r = BufferReader::with_block_size(Cursor::new(b"hello world".to_vec()), 4);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }
}
