//! WARC file writing.

use std::io::{Read, Write};

use crate::{
    builder::{RecordPayload, WarcRecord},
    compress::{Compressor, Format},
    digest::AlgorithmName,
    error::{GeneralError, LoadError, LoadErrorKind},
    record::RecordType,
};

const COPY_BUFFER_LENGTH: usize = 16384;

/// Serializes records into a WARC stream.
///
/// With gzip enabled, every record becomes a self-contained gzip member so
/// that readers can seek to member boundaries and repair tools can operate
/// record by record.
pub struct WarcWriter<W: Write> {
    output: Compressor<W>,
    gzip: bool,
    digest_algorithm: AlgorithmName,
}

impl<W: Write> WarcWriter<W> {
    pub fn new(dest: W, gzip: bool) -> Self {
        let format = if gzip { Format::Gzip } else { Format::Identity };

        Self {
            output: Compressor::new(dest, format),
            gzip,
            digest_algorithm: AlgorithmName::Sha1,
        }
    }

    pub fn with_digest_algorithm(mut self, algorithm: AlgorithmName) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    pub fn is_gzip(&self) -> bool {
        self.gzip
    }

    /// Flushes buffered data and returns the underlying writer.
    ///
    /// Must be called to produce a valid archive.
    pub fn finish(self) -> std::io::Result<W> {
        self.output.finish()
    }

    /// Writes one record, filling defaults, digests, and `Content-Length`.
    pub fn write_record(&mut self, record: &mut WarcRecord<'_>) -> Result<(), GeneralError> {
        if !record.rec_headers.protocol.starts_with("WARC/") {
            return Err(LoadError::new(LoadErrorKind::Other)
                .with_snippet(format!(
                    "record version line '{}' is not WARC",
                    record.rec_headers.protocol
                ))
                .into());
        }

        if !record.rec_headers.headers.contains_name("Content-Type") {
            record
                .rec_headers
                .headers
                .append("Content-Type", record.rec_type.default_content_type());
        }

        record.ensure_digests(self.digest_algorithm)?;

        // length must be known before the header block is emitted
        if record.payload_length().is_none() {
            record.normalize_payload()?;
        }

        // a revisit block is its HTTP headers alone, but only when they are
        // parsed out; an opaque block passes through unchanged
        let suppress_payload =
            record.rec_type == RecordType::Revisit && record.http_headers.is_some();

        let http_len = record.http_buffer().map(|b| b.len() as u64).unwrap_or(0);
        let payload_len = if suppress_payload {
            0
        } else {
            record.payload_length().expect("normalized above")
        };

        record
            .rec_headers
            .headers
            .replace("Content-Length", (http_len + payload_len).to_string());

        tracing::trace!(
            rec_type = %record.rec_type,
            content_length = http_len + payload_len,
            "write record"
        );

        let header_block = record
            .rec_headers
            .to_bytes(|name, value| Some((name.to_string(), value.to_string())));
        self.output.write_all(&header_block)?;

        if let Some(http_buf) = record.http_buffer() {
            self.output.write_all(http_buf)?;
        }

        if !suppress_payload {
            self.copy_payload(record, payload_len)?;
        }

        self.output.write_all(b"\r\n\r\n")?;
        self.output.flush()?;
        self.output.start_new_member()?;

        Ok(())
    }

    fn copy_payload(
        &mut self,
        record: &mut WarcRecord<'_>,
        expected_len: u64,
    ) -> Result<(), GeneralError> {
        let written = match &mut record.payload {
            RecordPayload::Empty => 0,
            RecordPayload::Bytes(bytes) => {
                self.output.write_all(bytes)?;
                bytes.len() as u64
            }
            RecordPayload::Spooled(spool) => {
                spool.rewind()?;
                copy_stream(spool, &mut self.output)?
            }
            RecordPayload::Reader(reader) => copy_stream(reader, &mut self.output)?,
        };

        if written != expected_len {
            return Err(LoadError::new(LoadErrorKind::Other)
                .with_source(ContentLengthMismatch::new(expected_len, written))
                .into());
        }

        Ok(())
    }

    /// Writes a captured exchange as a response record followed by the
    /// request that produced it.
    ///
    /// The request inherits the response's target URI and date and gains a
    /// `WARC-Concurrent-To` link to the response record.
    pub fn write_request_response_pair(
        &mut self,
        request: &mut WarcRecord<'_>,
        response: &mut WarcRecord<'_>,
    ) -> Result<(), GeneralError> {
        if let Some(uri) = response.rec_headers.get("WARC-Target-URI") {
            let uri = uri.to_string();
            request.set_header("WARC-Target-URI", uri);
        }

        if let Some(date) = response.rec_headers.get("WARC-Date") {
            let date = date.to_string();
            request.set_header("WARC-Date", date);
        }

        if let Some(response_id) = response.rec_headers.get("WARC-Record-ID") {
            let response_id = response_id.to_string();
            request
                .rec_headers
                .headers
                .append("WARC-Concurrent-To", response_id);
        }

        self.write_record(response)?;
        self.write_record(request)
    }
}

fn copy_stream<R: Read + ?Sized, W: Write>(source: &mut R, dest: &mut W) -> std::io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_LENGTH];
    let mut total = 0u64;

    loop {
        let len = source.read(&mut buf)?;

        if len == 0 {
            return Ok(total);
        }

        dest.write_all(&buf[..len])?;
        total += len as u64;
    }
}

/// Error for a payload that did not match its declared size.
#[derive(Debug, thiserror::Error)]
#[error("content length mismatch: expected {expected}, got {actual}")]
pub struct ContentLengthMismatch {
    expected: u64,
    actual: u64,
}

impl ContentLengthMismatch {
    pub fn new(expected: u64, actual: u64) -> Self {
        Self { expected, actual }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::builder::RecordBuilder;
    use crate::fields::FieldMap;
    use crate::headers::StatusAndHeaders;

    use super::*;

    #[test]
    fn test_write_uncompressed() {
        let builder = RecordBuilder::new();
        let mut record =
            builder.create_warc_record(Some("http://example.com/"), RecordType::Resource);
        record.set_payload_bytes(b"hello".to_vec());

        let mut writer = WarcWriter::new(Vec::new(), false);
        writer.write_record(&mut record).unwrap();
        let out = writer.finish().unwrap();

        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("WARC/1.0\r\n"));
        assert!(text.contains("WARC-Type: resource\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.contains("WARC-Block-Digest: sha1:"));
        assert!(text.ends_with("hello\r\n\r\n"));
    }

    #[test]
    fn test_write_gzip_members_start_fresh() {
        let builder = RecordBuilder::new();

        let mut writer = WarcWriter::new(Vec::new(), true);

        let mut first = builder.create_warc_record(None, RecordType::Warcinfo);
        writer.write_record(&mut first).unwrap();

        let mut second = builder.create_warc_record(None, RecordType::Metadata);
        writer.write_record(&mut second).unwrap();

        let out = writer.finish().unwrap();

        // two independent gzip members
        assert!(out.starts_with(&[0x1f, 0x8b]));
        let second_member = out[2..]
            .windows(2)
            .position(|w| w == [0x1f, 0x8b])
            .map(|p| p + 2);
        assert!(second_member.is_some());
    }

    #[test]
    fn test_write_response_with_http_headers() {
        let builder = RecordBuilder::new();
        let mut record =
            builder.create_warc_record(Some("http://example.com/"), RecordType::Response);

        record.set_http_headers(StatusAndHeaders::new(
            "HTTP/1.0",
            "200 OK",
            FieldMap::from_iter([("Content-Type", "text/plain")]),
        ));
        record.set_payload_bytes(b"some text".to_vec());

        let mut writer = WarcWriter::new(Vec::new(), false);
        writer.write_record(&mut record).unwrap();
        let out = writer.finish().unwrap();
        let text = String::from_utf8(out).unwrap();

        let http_block = "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\n";
        let expected_len = http_block.len() + "some text".len();

        assert!(text.contains(&format!("Content-Length: {}\r\n", expected_len)));
        assert!(text.contains(http_block));
        assert!(text.contains("WARC-Payload-Digest: sha1:"));
        assert!(text.ends_with("some text\r\n\r\n"));
    }

    #[test]
    fn test_revisit_suppresses_payload() {
        let builder = RecordBuilder::new();
        let mut record = builder.create_revisit_record(
            "http://example.com/",
            "http://netpreserve.org/warc/1.0/revisit/identical-payload-digest",
            "http://example.com/",
            "2017-03-06T04:03:48Z",
            "sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ",
            Some(StatusAndHeaders::new("HTTP/1.0", "200 OK", FieldMap::new())),
        );
        // even if a payload is attached, a revisit body is headers only
        record.set_payload_bytes(b"should not appear".to_vec());

        let mut writer = WarcWriter::new(Vec::new(), false);
        writer.write_record(&mut record).unwrap();
        let out = String::from_utf8(writer.finish().unwrap()).unwrap();

        assert!(!out.contains("should not appear"));

        let http_block_len = "HTTP/1.0 200 OK\r\n\r\n".len();
        assert!(out.contains(&format!("Content-Length: {}\r\n", http_block_len)));
    }

    #[test]
    fn test_request_response_pair() {
        let builder = RecordBuilder::new();

        let mut response =
            builder.create_warc_record(Some("http://example.com/"), RecordType::Response);
        response.set_payload_bytes(b"body".to_vec());

        let mut request = builder.create_warc_record(None, RecordType::Request);

        let mut writer = WarcWriter::new(Vec::new(), false);
        writer
            .write_request_response_pair(&mut request, &mut response)
            .unwrap();
        let out = String::from_utf8(writer.finish().unwrap()).unwrap();

        let response_id = response.rec_headers.get("WARC-Record-ID").unwrap();
        assert!(out.contains(&format!("WARC-Concurrent-To: {}\r\n", response_id)));

        // request has matching URI and date
        assert_eq!(
            request.rec_headers.get("WARC-Target-URI"),
            response.rec_headers.get("WARC-Target-URI")
        );
        assert_eq!(
            request.rec_headers.get("WARC-Date"),
            response.rec_headers.get("WARC-Date")
        );

        let response_pos = out.find("WARC-Type: response").unwrap();
        let request_pos = out.find("WARC-Type: request").unwrap();
        assert!(response_pos < request_pos);
    }

    #[test]
    fn test_content_length_mismatch() {
        let builder = RecordBuilder::new();
        let record = builder.create_warc_record(None, RecordType::Resource);

        // declared 10 bytes, provides 4: the writer must not emit a framing
        // it cannot honor
        let mut record = record.with_payload_reader(Box::new(Cursor::new(b"1234".to_vec())), Some(10));
        record.set_header("WARC-Block-Digest", "sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ");
        record.set_header("WARC-Payload-Digest", "sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ");

        let mut writer = WarcWriter::new(Vec::new(), false);
        assert!(writer.write_record(&mut record).is_err());
    }
}
