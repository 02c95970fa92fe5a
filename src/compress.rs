//! Reader and writer abstractions for compressed archive streams.
//!
//! Gzip supports concatenated members, which web archives use to compress
//! each record individually ("per-record gzipping"). The decompressor stops
//! at every member boundary so the caller can account for record framing
//! before starting the next member.

use std::{
    fmt::{Debug, Display},
    io::{BufRead, Read, Write},
    str::FromStr,
};

use brotli::Decompressor as BrDecoder;
use flate2::{
    bufread::{DeflateDecoder, GzDecoder, ZlibDecoder},
    write::GzEncoder,
    Compression,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Compression format.
pub enum Format {
    /// No codec. Leave data unchanged.
    #[default]
    Identity,

    /// Zlib file format with Deflate codec.
    Deflate,

    /// Deflate codec without the zlib wrapper.
    ///
    /// Some servers omit the zlib header when claiming `deflate`.
    DeflateRaw,

    /// Gzip file format and codec.
    ///
    /// Supports concatenated members.
    Gzip,

    /// Brotli raw codec.
    Brotli,
}

impl Format {
    /// Returns whether the codec supports concatenated members.
    pub fn supports_concatenation(&self) -> bool {
        matches!(self, Self::Gzip)
    }
}

impl FromStr for Format {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "deflate" => Ok(Self::Deflate),
            "deflate-raw" => Ok(Self::DeflateRaw),
            "gzip" | "x-gzip" | "gz" => Ok(Self::Gzip),
            "br" | "brotli" => Ok(Self::Brotli),
            _ => Err(FormatParseError),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Deflate => write!(f, "deflate"),
            Self::DeflateRaw => write!(f, "deflate-raw"),
            Self::Gzip => write!(f, "gzip"),
            Self::Brotli => write!(f, "br"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
/// Error for `FromStr` of `Format`.
pub struct FormatParseError;

impl Display for FormatParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid compression format")
    }
}

enum Decoder<R: BufRead> {
    Identity(R),
    Deflate(ZlibDecoder<R>),
    DeflateRaw(DeflateDecoder<R>),
    Gzip(GzDecoder<R>),
    Brotli(Box<BrDecoder<R>>),
    None,
}

impl<R: BufRead> Decoder<R> {
    fn new(source: R, format: Format) -> Self {
        match format {
            Format::Identity => Decoder::Identity(source),
            Format::Deflate => Decoder::Deflate(ZlibDecoder::new(source)),
            Format::DeflateRaw => Decoder::DeflateRaw(DeflateDecoder::new(source)),
            Format::Gzip => Decoder::Gzip(GzDecoder::new(source)),
            Format::Brotli => Decoder::Brotli(Box::new(BrDecoder::new(source, 4096))),
        }
    }

    fn get_ref(&self) -> &R {
        match self {
            Self::Identity(r) => r,
            Self::Deflate(codec) => codec.get_ref(),
            Self::DeflateRaw(codec) => codec.get_ref(),
            Self::Gzip(codec) => codec.get_ref(),
            Self::Brotli(codec) => codec.get_ref(),
            Self::None => unreachable!(),
        }
    }

    fn get_mut(&mut self) -> &mut R {
        match self {
            Self::Identity(r) => r,
            Self::Deflate(codec) => codec.get_mut(),
            Self::DeflateRaw(codec) => codec.get_mut(),
            Self::Gzip(codec) => codec.get_mut(),
            Self::Brotli(codec) => codec.get_mut(),
            Self::None => unreachable!(),
        }
    }

    fn into_inner(self) -> R {
        match self {
            Self::Identity(r) => r,
            Self::Deflate(codec) => codec.into_inner(),
            Self::DeflateRaw(codec) => codec.into_inner(),
            Self::Gzip(codec) => codec.into_inner(),
            Self::Brotli(codec) => codec.into_inner(),
            Self::None => unreachable!(),
        }
    }
}

impl<R: BufRead> Debug for Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Identity(_) => "Identity",
            Self::Deflate(_) => "Deflate",
            Self::DeflateRaw(_) => "DeflateRaw",
            Self::Gzip(_) => "Gzip",
            Self::Brotli(_) => "Brotli",
            Self::None => "None",
        };
        f.debug_tuple(name).finish()
    }
}

impl<R: BufRead> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Decoder::Identity(r) => r.read(buf),
            Decoder::Deflate(codec) => codec.read(buf),
            Decoder::DeflateRaw(codec) => codec.read(buf),
            Decoder::Gzip(codec) => codec.read(buf),
            Decoder::Brotli(codec) => codec.read(buf),
            Decoder::None => unreachable!(),
        }
    }
}

/// Decoder for decompressing streams member by member.
#[derive(Debug)]
pub struct Decompressor<R: BufRead> {
    decoder: Decoder<R>,
    format: Format,
    emitted: u64,
    errored: bool,
}

impl<R: BufRead> Decompressor<R> {
    /// Create a decompressor for reading compressed data from the given reader.
    pub fn new(source: R, format: Format) -> Self {
        Self {
            decoder: Decoder::new(source, format),
            format,
            emitted: 0,
            errored: false,
        }
    }

    /// [Create](Self::new()) a decompressor, probing the first block.
    ///
    /// If the first block of the source fails to decompress under the
    /// requested format, the source is treated as not compressed. For
    /// `Deflate`, a raw-deflate retry happens before giving up. Nothing is
    /// consumed from the source by the probe.
    pub fn new_with_detection(mut source: R, format: Format) -> std::io::Result<Self> {
        let effective = {
            let peek = source.fill_buf()?;
            detect_format(peek, format)
        };

        if effective != format {
            tracing::debug!(requested = %format, effective = %effective, "detected stream format");
        }

        Ok(Self::new(source, effective))
    }

    /// Returns the format the stream is actually decoded with.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Return a reference of the underlying reader.
    pub fn get_ref(&self) -> &R {
        self.decoder.get_ref()
    }

    /// Return a mutable reference of the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        self.decoder.get_mut()
    }

    /// Return the underlying reader.
    pub fn into_inner(self) -> R {
        self.decoder.into_inner()
    }

    /// Prepares the codec for reading the next concatenated member.
    ///
    /// This function has effect for only codecs that support concatenation.
    /// It should only be called once the current member is exhausted, which
    /// is indicated by 0 bytes returned when reading from this struct.
    pub fn start_next_member(&mut self) -> std::io::Result<()> {
        if self.format.supports_concatenation() {
            let decoder = std::mem::replace(&mut self.decoder, Decoder::None);
            let source = decoder.into_inner();
            self.decoder = Decoder::new(source, self.format);
        }

        Ok(())
    }

    /// Returns if any source data is left to be read.
    ///
    /// If nothing can be read from the current member but source data
    /// remains, the next member can be started.
    pub fn has_data_left(&mut self) -> std::io::Result<bool> {
        let buf = self.decoder.get_mut().fill_buf()?;
        Ok(!buf.is_empty())
    }
}

impl<R: BufRead> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.errored {
            return Ok(0);
        }

        match self.decoder.read(buf) {
            Ok(len) => {
                self.emitted += len as u64;
                Ok(len)
            }
            Err(error) if is_corruption(&error) => {
                // The stream decoded fine up to here. A bad tail should not
                // discard everything already read, so end the stream instead.
                self.errored = true;
                tracing::warn!(
                    %error,
                    emitted = self.emitted,
                    "decompression failed mid-stream, truncating"
                );
                Ok(0)
            }
            Err(error) => Err(error),
        }
    }
}

fn is_corruption(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::InvalidData
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::UnexpectedEof
    )
}

fn detect_format(peek: &[u8], requested: Format) -> Format {
    if peek.is_empty() {
        return requested;
    }

    match requested {
        Format::Identity => Format::Identity,
        Format::Gzip => {
            if probe(GzDecoder::new(peek)) {
                Format::Gzip
            } else {
                Format::Identity
            }
        }
        Format::Deflate => {
            if probe(ZlibDecoder::new(peek)) {
                Format::Deflate
            } else if probe(DeflateDecoder::new(peek)) {
                Format::DeflateRaw
            } else {
                Format::Identity
            }
        }
        Format::DeflateRaw => {
            if probe(DeflateDecoder::new(peek)) {
                Format::DeflateRaw
            } else {
                Format::Identity
            }
        }
        Format::Brotli => {
            if probe(BrDecoder::new(peek, 4096)) {
                Format::Brotli
            } else {
                Format::Identity
            }
        }
    }
}

fn probe<D: Read>(mut decoder: D) -> bool {
    let mut buf = [0u8; 1];

    loop {
        match decoder.read(&mut buf) {
            Ok(_) => return true,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return false,
        }
    }
}

enum Encoder<W: Write> {
    Identity(W),
    Gzip(GzEncoder<W>),
    None,
}

impl<W: Write> Encoder<W> {
    fn new(dest: W, format: Format) -> Self {
        match format {
            Format::Gzip => Encoder::Gzip(GzEncoder::new(dest, Compression::default())),
            _ => Encoder::Identity(dest),
        }
    }

    fn finish(self) -> std::io::Result<W> {
        match self {
            Self::Identity(w) => Ok(w),
            Self::Gzip(codec) => codec.finish(),
            Self::None => unreachable!(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Identity(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::None => unreachable!(),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Identity(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::None => unreachable!(),
        }
    }
}

/// Encoder for writing streams of concatenated compressed members.
pub struct Compressor<W: Write> {
    encoder: Encoder<W>,
    format: Format,
}

impl<W: Write> Compressor<W> {
    /// Create a compressor for writing compressed data to the given writer.
    ///
    /// Only `Gzip` compresses; any other format passes data through.
    pub fn new(dest: W, format: Format) -> Self {
        Self {
            encoder: Encoder::new(dest, format),
            format,
        }
    }

    pub fn get_ref(&self) -> &W {
        match &self.encoder {
            Encoder::Identity(w) => w,
            Encoder::Gzip(codec) => codec.get_ref(),
            Encoder::None => unreachable!(),
        }
    }

    /// Write ending encoder data, consume the compressor, and return the
    /// underlying writer.
    pub fn finish(self) -> std::io::Result<W> {
        self.encoder.finish()
    }

    /// Ends the current member and prepares the codec for writing a new one.
    ///
    /// This function has effect for only codecs that support concatenation.
    pub fn start_new_member(&mut self) -> std::io::Result<()> {
        if self.format.supports_concatenation() {
            let encoder = std::mem::replace(&mut self.encoder, Encoder::None);
            let dest = encoder.finish()?;
            self.encoder = Encoder::new(dest, self.format);
        }

        Ok(())
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor};

    use super::*;

    #[test]
    fn test_compress_decompress_members() {
        let buf = Vec::new();
        let mut c = Compressor::new(buf, Format::Gzip);

        c.write_all(b"Hello").unwrap();
        c.start_new_member().unwrap();
        c.write_all(b"world").unwrap();

        let buf = c.finish().unwrap();

        let mut d = Decompressor::new(BufReader::new(Cursor::new(buf)), Format::Gzip);

        let mut buf = Vec::new();

        d.read_to_end(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
        assert!(d.has_data_left().unwrap());

        buf.clear();
        d.start_next_member().unwrap();
        d.read_to_end(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert!(!d.has_data_left().unwrap());

        d.into_inner();
    }

    #[test]
    fn test_detection_not_compressed() {
        let data = b"WARC/1.0\r\nContent-Length: 0\r\n\r\n\r\n\r\n";

        let mut d =
            Decompressor::new_with_detection(BufReader::new(Cursor::new(data.to_vec())), Format::Gzip)
                .unwrap();

        assert_eq!(d.format(), Format::Identity);

        let mut buf = Vec::new();
        d.read_to_end(&mut buf).unwrap();
        assert_eq!(&buf, data);
    }

    #[test]
    fn test_detection_gzip() {
        let mut c = Compressor::new(Vec::new(), Format::Gzip);
        c.write_all(b"data").unwrap();
        let buf = c.finish().unwrap();

        let d = Decompressor::new_with_detection(BufReader::new(Cursor::new(buf)), Format::Gzip)
            .unwrap();

        assert_eq!(d.format(), Format::Gzip);
    }

    #[test]
    fn test_detection_raw_deflate() {
        use flate2::write::DeflateEncoder;

        let mut c = DeflateEncoder::new(Vec::new(), Compression::default());
        c.write_all(b"raw deflate data").unwrap();
        let buf = c.finish().unwrap();

        let mut d =
            Decompressor::new_with_detection(BufReader::new(Cursor::new(buf)), Format::Deflate)
                .unwrap();

        assert_eq!(d.format(), Format::DeflateRaw);

        let mut out = Vec::new();
        d.read_to_end(&mut out).unwrap();
        assert_eq!(&out, b"raw deflate data");
    }
}
