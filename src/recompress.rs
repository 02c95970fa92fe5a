//! Repair of archives that are not per-record gzipped.

use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
};

use flate2::bufread::MultiGzDecoder;

use crate::{
    archive::{ArchiveConfig, ArchiveIterator},
    builder::RecordBuilder,
    error::GeneralError,
    util::SpooledBuffer,
    writer::WarcWriter,
};

const COPY_BUFFER_LENGTH: usize = 16384;

/// Outcome of a recompression run.
#[derive(Debug, Clone, Copy)]
pub struct RecompressStats {
    /// Records written to the output.
    pub count: u64,
    /// Whether the fallback full-decompression pass was needed.
    pub fixed: bool,
}

/// Streams records from `source` into a per-record-gzipped WARC on `dest`.
///
/// ARC input is translated to WARC records on the way through.
pub struct StreamRecompressor<R: Read, W: Write> {
    source: R,
    dest: W,
}

impl<R: Read, W: Write> StreamRecompressor<R, W> {
    pub fn new(source: R, dest: W) -> Self {
        Self { source, dest }
    }

    /// First-pass strategy: iterate the input as if well-formed.
    ///
    /// Fails if the input's gzip framing violates one-record-per-member or
    /// a record's declared length does not hold.
    pub fn recompress(&mut self) -> Result<u64, GeneralError> {
        load_and_write(&mut self.source, &mut self.dest)
    }

    /// Fallback strategy: decompress the entire input to a spooled buffer,
    /// then iterate the now-plain stream.
    pub fn decompress_recompress(&mut self) -> Result<u64, GeneralError> {
        let mut spool = SpooledBuffer::new();

        decompress_whole(&mut self.source, &mut spool)?;
        spool.rewind()?;

        load_and_write(&mut spool, &mut self.dest)
    }
}

/// File-level repair: try the straight pass, fall back to whole-stream
/// decompression when the input's framing is broken.
pub struct Recompressor<'p> {
    input: &'p Path,
    output: &'p Path,
}

impl<'p> Recompressor<'p> {
    pub fn new(input: &'p Path, output: &'p Path) -> Self {
        Self { input, output }
    }

    pub fn recompress(&self) -> Result<RecompressStats, GeneralError> {
        let first_attempt = {
            let source = BufReader::new(File::open(self.input)?);
            let dest = File::create(self.output)?;

            StreamRecompressor::new(source, dest).recompress()
        };

        match first_attempt {
            Ok(count) => Ok(RecompressStats {
                count,
                fixed: false,
            }),
            Err(error) => {
                tracing::warn!(
                    %error,
                    input = %self.input.display(),
                    "archive not readable as-is, decompressing whole stream"
                );

                let source = BufReader::new(File::open(self.input)?);
                let dest = File::create(self.output)?;

                let count = StreamRecompressor::new(source, dest).decompress_recompress()?;

                Ok(RecompressStats { count, fixed: true })
            }
        }
    }
}

fn load_and_write<R: Read, W: Write>(source: R, dest: W) -> Result<u64, GeneralError> {
    let config = ArchiveConfig {
        parse_http: false,
        arc2warc: true,
        ..Default::default()
    };

    let mut archive = ArchiveIterator::with_config(source, config)?;
    let mut writer = WarcWriter::new(dest, true);
    let builder = RecordBuilder::new();
    let mut count = 0u64;

    while let Some(mut record) = archive.next_record()? {
        let length = record.length();
        let rec_type = record.rec_type();
        let rec_headers = record.rec_headers().clone();

        let mut out_record = builder
            .create_warc_record(None, rec_type)
            .with_payload_reader(Box::new(&mut record), Some(length));
        out_record.rec_headers = rec_headers;

        writer.write_record(&mut out_record)?;
        count += 1;
    }

    writer.finish()?;

    Ok(count)
}

/// Decompresses all gzip members of a stream, ignoring member boundaries.
/// Input that is not gzip is copied through unchanged.
fn decompress_whole<R: Read, W: Write>(source: &mut R, dest: &mut W) -> Result<(), GeneralError> {
    let mut reader = BufReader::new(source);

    let is_gzip = {
        use std::io::BufRead;
        let peek = reader.fill_buf()?;
        peek.starts_with(&[0x1f, 0x8b])
    };

    let mut buf = vec![0u8; COPY_BUFFER_LENGTH];

    if is_gzip {
        let mut decoder = MultiGzDecoder::new(reader);

        loop {
            let len = decoder.read(&mut buf)?;
            if len == 0 {
                break;
            }
            dest.write_all(&buf[..len])?;
        }
    } else {
        loop {
            let len = reader.read(&mut buf)?;
            if len == 0 {
                break;
            }
            dest.write_all(&buf[..len])?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write as _};

    use crate::compress::{Compressor, Format};
    use crate::record::RecordType;

    use super::*;

    const RECORD: &str = "WARC/1.0\r\n\
        WARC-Type: resource\r\n\
        WARC-Record-ID: <urn:uuid:e9a0cecc-0221-11e7-adb1-0242ac120009>\r\n\
        WARC-Target-URI: file:///test.txt\r\n\
        WARC-Date: 2017-03-06T04:03:53Z\r\n\
        Content-Type: text/plain\r\n\
        Content-Length: 5\r\n\
        \r\n\
        hello\r\n\r\n";

    fn rec_types(data: &[u8]) -> Vec<RecordType> {
        let mut archive = ArchiveIterator::new(Cursor::new(data.to_vec())).unwrap();
        let mut types = Vec::new();

        while let Some(record) = archive.next_record().unwrap() {
            types.push(record.rec_type());
        }

        types
    }

    #[test]
    fn test_recompress_plain_input() {
        let mut dest = Vec::new();
        let count = StreamRecompressor::new(Cursor::new(RECORD.as_bytes()), &mut dest)
            .recompress()
            .unwrap();

        assert_eq!(count, 1);
        assert!(dest.starts_with(&[0x1f, 0x8b]));
        assert_eq!(rec_types(&dest), vec![RecordType::Resource]);
    }

    #[test]
    fn test_recompress_whole_file_gzip() {
        let mut compressor = Compressor::new(Vec::new(), Format::Gzip);
        compressor.write_all(RECORD.as_bytes()).unwrap();
        compressor.write_all(RECORD.as_bytes()).unwrap();
        let bad = compressor.finish().unwrap();

        // straight pass refuses the multi-record member
        let mut dest = Vec::new();
        assert!(StreamRecompressor::new(Cursor::new(bad.clone()), &mut dest)
            .recompress()
            .is_err());

        // fallback pass repairs it
        let mut dest = Vec::new();
        let count = StreamRecompressor::new(Cursor::new(bad), &mut dest)
            .decompress_recompress()
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            rec_types(&dest),
            vec![RecordType::Resource, RecordType::Resource]
        );
    }

    #[test]
    fn test_recompress_arc_translates() {
        let arc = "filedesc://example.arc 127.0.0.1 20170306040348 text/plain 10\n\
            1 0 Test20\n\
            http://example.com/ 93.184.216.34 20170306040348 text/html 21\n\
            HTTP/1.0 200 OK\r\n\r\nhi\n\n";

        let mut dest = Vec::new();
        let count = StreamRecompressor::new(Cursor::new(arc.as_bytes()), &mut dest)
            .recompress()
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            rec_types(&dest),
            vec![RecordType::Warcinfo, RecordType::Response]
        );
    }
}
