//! Archive record model.

use std::io::Read;

use crate::{
    archive::ArchiveIterator,
    chunked::ChunkedReader,
    compress::{Decompressor, Format},
    headers::StatusAndHeaders,
    io::BufferReader,
};

/// On-wire origin of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFormat {
    Warc,
    Arc,
    /// ARC record synthesized into WARC form while reading.
    Arc2Warc,
}

impl RecordFormat {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Warc => "warc",
            Self::Arc => "arc",
            Self::Arc2Warc => "arc2warc",
        }
    }
}

/// WARC record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Warcinfo,
    Response,
    Request,
    Revisit,
    Resource,
    Metadata,
    Conversion,
    Continuation,
    /// The leading `filedesc://` record of an ARC file.
    ArcHeader,
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Warcinfo => "warcinfo",
            Self::Response => "response",
            Self::Request => "request",
            Self::Revisit => "revisit",
            Self::Resource => "resource",
            Self::Metadata => "metadata",
            Self::Conversion => "conversion",
            Self::Continuation => "continuation",
            Self::ArcHeader => "arc_header",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "warcinfo" => Some(Self::Warcinfo),
            "response" => Some(Self::Response),
            "request" => Some(Self::Request),
            "revisit" => Some(Self::Revisit),
            "resource" => Some(Self::Resource),
            "metadata" => Some(Self::Metadata),
            "conversion" => Some(Self::Conversion),
            "continuation" => Some(Self::Continuation),
            "arc_header" => Some(Self::ArcHeader),
            _ => None,
        }
    }

    /// Default `Content-Type` for a record block of this type.
    pub fn default_content_type(&self) -> &str {
        match self {
            Self::Warcinfo | Self::Metadata => "application/warc-fields",
            Self::Response | Self::Revisit => "application/http; msgtype=response",
            Self::Request => "application/http; msgtype=request",
            _ => "application/warc-record",
        }
    }

    /// Returns whether the record block may embed an HTTP message.
    pub fn has_http_headers(&self, ensure_http_headers: bool) -> bool {
        match self {
            Self::Response | Self::Request | Self::Revisit => true,
            Self::Resource => ensure_http_headers,
            _ => false,
        }
    }

    /// Returns whether a payload digest applies to this record type.
    pub fn is_payload_eligible(&self) -> bool {
        matches!(
            self,
            Self::Response | Self::Request | Self::Revisit | Self::Resource
        )
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record yielded by an [`ArchiveIterator`].
///
/// The record exclusively borrows the iterator; its body is a forward-only
/// stream bounded to the record's `Content-Length`. Reading through the
/// record updates digest verification state. Whatever is left unread is
/// drained by the iterator before the next record is parsed.
pub struct Record<'a, R: Read> {
    pub(crate) archive: &'a mut ArchiveIterator<R>,
    pub(crate) format: RecordFormat,
    pub(crate) rec_type: RecordType,
    pub(crate) rec_headers: StatusAndHeaders,
    pub(crate) http_headers: Option<StatusAndHeaders>,
    pub(crate) length: u64,
    pub(crate) payload_length: u64,
    pub(crate) offset: u64,
}

impl<'a, R: Read> Record<'a, R> {
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    pub fn rec_type(&self) -> RecordType {
        self.rec_type
    }

    /// The WARC record header block (synthesized for ARC records).
    pub fn rec_headers(&self) -> &StatusAndHeaders {
        &self.rec_headers
    }

    /// The embedded HTTP message headers, when the record carries one.
    pub fn http_headers(&self) -> Option<&StatusAndHeaders> {
        self.http_headers.as_ref()
    }

    /// Declared `Content-Type` of the record block.
    pub fn content_type(&self) -> Option<&str> {
        self.rec_headers.get("Content-Type")
    }

    /// Declared `Content-Length` of the record block.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Length of the payload following any embedded HTTP headers.
    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }

    /// Byte offset of this record in the underlying source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes of the record block not yet read.
    pub fn body_remaining(&self) -> u64 {
        self.archive.body_remaining()
    }

    /// Outcome of digest verification so far.
    ///
    /// `None` until a comparison has happened, which requires the body to
    /// be fully read.
    pub fn digest_passed(&self) -> Option<bool> {
        self.archive.body_checker().and_then(|c| c.passed())
    }

    /// Problems recorded by digest verification.
    pub fn digest_problems(&self) -> Vec<String> {
        self.archive
            .body_checker()
            .map(|c| c.problems().to_vec())
            .unwrap_or_default()
    }

    /// Returns whether any digest was declared on this record.
    pub fn has_digest(&self) -> bool {
        self.rec_headers.get("WARC-Payload-Digest").is_some()
            || self.rec_headers.get("WARC-Block-Digest").is_some()
    }

    fn is_chunked(&self) -> bool {
        self.http_headers
            .as_ref()
            .and_then(|h| h.get("Transfer-Encoding"))
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn content_encoding(&self) -> Format {
        self.http_headers
            .as_ref()
            .and_then(|h| h.get("Content-Encoding"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(Format::Identity)
    }

    /// Returns a reader over the decoded content of the record.
    ///
    /// The view strips HTTP chunked framing and decodes content codings
    /// announced by the embedded HTTP headers. It shares the byte budget
    /// with the raw stream: bytes read here come off the record block and
    /// still feed digest verification.
    pub fn content_reader(&mut self) -> std::io::Result<ContentReader<'_, 'a, R>> {
        let chunked = self.is_chunked();
        let encoding = self.content_encoding();

        let buffered = BufferReader::new(&mut *self);
        let dechunked = if chunked {
            ChunkedReader::new(buffered)
        } else {
            ChunkedReader::pass_through(buffered)
        };

        let inner = Decompressor::new_with_detection(BufferReader::new(dechunked), encoding)?;

        Ok(ContentReader { inner })
    }
}

impl<R: Read> Read for Record<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.archive.read_body(buf)
    }
}

impl<R: Read> std::fmt::Debug for Record<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("format", &self.format)
            .field("rec_type", &self.rec_type)
            .field("length", &self.length)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Decoded-content view of a record body.
///
/// See [`Record::content_reader`].
pub struct ContentReader<'r, 'a, R: Read> {
    inner: Decompressor<BufferReader<ChunkedReader<BufferReader<&'r mut Record<'a, R>>>>>,
}

impl<R: Read> Read for ContentReader<'_, '_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_round_trip() {
        for rec_type in [
            RecordType::Warcinfo,
            RecordType::Response,
            RecordType::Request,
            RecordType::Revisit,
            RecordType::Resource,
            RecordType::Metadata,
            RecordType::Conversion,
            RecordType::Continuation,
            RecordType::ArcHeader,
        ] {
            assert_eq!(RecordType::from_str_opt(rec_type.as_str()), Some(rec_type));
        }

        assert_eq!(RecordType::from_str_opt("bogus"), None);
    }

    #[test]
    fn test_default_content_types() {
        assert_eq!(
            RecordType::Warcinfo.default_content_type(),
            "application/warc-fields"
        );
        assert_eq!(
            RecordType::Response.default_content_type(),
            "application/http; msgtype=response"
        );
        assert_eq!(
            RecordType::Request.default_content_type(),
            "application/http; msgtype=request"
        );
        assert_eq!(
            RecordType::Conversion.default_content_type(),
            "application/warc-record"
        );
    }

    #[test]
    fn test_http_header_eligibility() {
        assert!(RecordType::Response.has_http_headers(false));
        assert!(!RecordType::Resource.has_http_headers(false));
        assert!(RecordType::Resource.has_http_headers(true));
        assert!(!RecordType::Warcinfo.has_http_headers(true));
    }
}
