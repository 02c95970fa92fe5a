//! HTTP `Transfer-Encoding: chunked` decoding.

use std::io::{BufRead, Read};

use crate::{
    error::{LoadError, LoadErrorKind},
    io::read_line_limited,
};

/// Chunk sizes above this are rejected as framing corruption.
const MAX_CHUNK_LENGTH: u64 = 1 << 31;

/// Longest accepted chunk size line (including extensions).
const MAX_SIZE_LINE_LENGTH: u64 = 1024;

#[derive(Debug)]
enum State {
    /// Expecting a chunk size line. `first` is true until one parses.
    SizeLine { first: bool },
    /// Inside chunk data with this many bytes left.
    Data { remaining: u64 },
    /// Expecting the CRLF that closes a chunk.
    Boundary,
    /// Saw the zero-length chunk and its final CRLF.
    Done,
    /// The stream claimed chunked encoding but is not; replay the failed
    /// size line, then pass everything through.
    PassThrough { pending: Vec<u8>, position: usize },
}

/// Decodes chunked transfer encoding from another reader.
///
/// Many archived captures claim chunked encoding but carry a plain body.
/// Unless `strict` is set, a first size line that fails to parse switches
/// the reader to pass-through with that line replayed in place.
#[derive(Debug)]
pub struct ChunkedReader<R: BufRead> {
    inner: R,
    state: State,
    strict: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_strict(inner, false)
    }

    pub fn with_strict(inner: R, strict: bool) -> Self {
        Self {
            inner,
            state: State::SizeLine { first: true },
            strict,
        }
    }

    /// Creates a reader that performs no dechunking at all.
    ///
    /// Lets callers keep one reader type whether or not the stream is
    /// chunked.
    pub fn pass_through(inner: R) -> Self {
        Self {
            inner,
            state: State::PassThrough {
                pending: Vec::new(),
                position: 0,
            },
            strict: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn process_size_line(&mut self, first: bool) -> std::io::Result<()> {
        let mut line = Vec::new();
        let len = read_line_limited(&mut self.inner, MAX_SIZE_LINE_LENGTH, &mut line)?;

        if len == 0 {
            if first {
                self.state = State::Done;
                return Ok(());
            }

            return Err(LoadError::new(LoadErrorKind::ChunkedData)
                .with_snippet("stream ended before the zero-length chunk")
                .into_io());
        }

        match parse::chunk_size_line(&line) {
            Ok((_remain, chunk_len)) if chunk_len <= MAX_CHUNK_LENGTH => {
                tracing::trace!(chunk_len, "parsed chunk size line");

                if chunk_len == 0 {
                    self.consume_final_line()?;
                    self.state = State::Done;
                } else {
                    self.state = State::Data {
                        remaining: chunk_len,
                    };
                }

                Ok(())
            }
            _ => {
                if first && !self.strict {
                    tracing::debug!("stream is not actually chunked, switching to pass-through");
                    self.state = State::PassThrough {
                        pending: line,
                        position: 0,
                    };
                    Ok(())
                } else {
                    Err(LoadError::new(LoadErrorKind::ChunkedData)
                        .with_snippet(String::from_utf8_lossy(&line).into_owned())
                        .into_io())
                }
            }
        }
    }

    fn process_boundary(&mut self) -> std::io::Result<()> {
        let mut line = Vec::new();
        let len = read_line_limited(&mut self.inner, 2, &mut line)?;

        if len == 0 || !matches!(line.as_slice(), b"\r\n" | b"\n" | b"\r") {
            return Err(LoadError::new(LoadErrorKind::ChunkedData)
                .with_snippet("missing CRLF after chunk data")
                .into_io());
        }

        // a lone CR means the LF is still unread
        if line.as_slice() == b"\r" {
            let mut rest = Vec::new();
            read_line_limited(&mut self.inner, 1, &mut rest)?;

            if rest.as_slice() != b"\n" {
                return Err(LoadError::new(LoadErrorKind::ChunkedData)
                    .with_snippet("missing CRLF after chunk data")
                    .into_io());
            }
        }

        self.state = State::SizeLine { first: false };
        Ok(())
    }

    fn consume_final_line(&mut self) -> std::io::Result<()> {
        let mut line = Vec::new();
        read_line_limited(&mut self.inner, MAX_SIZE_LINE_LENGTH, &mut line)?;
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match &mut self.state {
                State::SizeLine { first } => {
                    let first = *first;
                    self.process_size_line(first)?;
                }
                State::Data { remaining } => {
                    let want = buf.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                    let read_len = self.inner.read(&mut buf[..want])?;

                    if read_len == 0 {
                        return Err(LoadError::new(LoadErrorKind::ChunkedData)
                            .with_snippet("stream ended inside a chunk")
                            .into_io());
                    }

                    *remaining -= read_len as u64;

                    if *remaining == 0 {
                        self.state = State::Boundary;
                    }

                    return Ok(read_len);
                }
                State::Boundary => {
                    self.process_boundary()?;
                }
                State::Done => return Ok(0),
                State::PassThrough { pending, position } => {
                    if *position < pending.len() {
                        let len = buf.len().min(pending.len() - *position);
                        buf[..len].copy_from_slice(&pending[*position..*position + len]);
                        *position += len;
                        return Ok(len);
                    }

                    return self.inner.read(buf);
                }
            }
        }
    }
}

mod parse {
    use nom::{
        bytes::complete::{tag, take_while},
        character::complete::hex_digit1,
        combinator::{map, map_res, opt},
        sequence::{pair, terminated},
        IResult,
    };

    pub fn chunk_size_line(input: &[u8]) -> IResult<&[u8], u64> {
        terminated(map(pair(chunk_size, chunk_ext), |p| p.0), line_ending_opt)(input)
    }

    fn chunk_size(input: &[u8]) -> IResult<&[u8], u64> {
        map_res(hex_digit1, |b: &[u8]| {
            u64::from_str_radix(std::str::from_utf8(b).unwrap(), 16)
        })(input)
    }

    fn chunk_ext(input: &[u8]) -> IResult<&[u8], &[u8]> {
        take_while(|b: u8| b.is_ascii_graphic() || b == b' ' || b == b'\t')(input)
    }

    fn line_ending_opt(input: &[u8]) -> IResult<&[u8], ()> {
        let (input, _) = opt(tag(b"\r"))(input)?;
        let (input, _) = opt(tag(b"\n"))(input)?;
        Ok((input, ()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read_all(input: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut reader = ChunkedReader::new(Cursor::new(input.to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_decode() {
        let out = read_all(b"6\r\nHello \r\n6\r\nworld!\r\n0\r\n\r\n").unwrap();
        assert_eq!(out, b"Hello world!");
    }

    #[test]
    fn test_decode_with_extension() {
        let out = read_all(b"c;name=value\r\nHello world!\r\n0\r\n\r\n").unwrap();
        assert_eq!(out, b"Hello world!");
    }

    #[test]
    fn test_decode_empty() {
        let out = read_all(b"0\r\n\r\n").unwrap();
        assert_eq!(out, b"");
    }

    #[test]
    fn test_not_chunked_fallback() {
        let out = read_all(b"Hello there, this is not chunked at all\r\nmore data").unwrap();
        assert_eq!(
            out,
            b"Hello there, this is not chunked at all\r\nmore data"
        );
    }

    #[test]
    fn test_not_chunked_strict() {
        let mut reader =
            ChunkedReader::with_strict(Cursor::new(b"not chunked".to_vec()), true);
        let mut out = Vec::new();
        let error = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_bad_second_size_line() {
        let mut reader = ChunkedReader::new(Cursor::new(b"5\r\nhello\r\nnope\r\n".to_vec()));
        let mut out = Vec::new();
        let error = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_missing_chunk_boundary() {
        let mut reader = ChunkedReader::new(Cursor::new(b"5\r\nhelloX0\r\n\r\n".to_vec()));
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        // length over 2^31 cannot be trusted
        let mut reader =
            ChunkedReader::with_strict(Cursor::new(b"fffffffff\r\ndata".to_vec()), true);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
