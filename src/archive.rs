//! Archive iteration.
//!
//! The iterator owns the byte source; each yielded [`Record`] borrows the
//! iterator exclusively. Advancing drains whatever the caller left unread,
//! consumes the blank lines that separate records, and transitions gzip
//! members so that every record is parsed from a fully accounted position.

use std::io::{BufRead, Read};

use crate::{
    compress::{Decompressor, Format},
    digest::{AlgorithmName, Digest, DigestCheckKind, DigestChecker, Hasher},
    error::{GeneralError, LoadError, LoadErrorKind},
    headers::StatusAndHeadersParser,
    io::{read_line_limited, BufferReader, LogicalPosition, BLOCK_SIZE},
    loader::{
        self, ArchiveFormat, HTTP_REQUEST_PREFIXES, HTTP_RESPONSE_PREFIXES,
    },
    record::{Record, RecordFormat, RecordType},
};

const MAX_SEPARATOR_LINE_LENGTH: u64 = 8192;
const DRAIN_BUFFER_LENGTH: usize = 4096;

/// Configuration for an [`ArchiveIterator`].
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Requested compression of the source; auto-detected on the first
    /// block, falling back to no compression.
    pub compression: Format,
    /// Digest verification policy.
    pub digest_check: DigestCheckKind,
    /// Parse embedded HTTP headers off record blocks. Disabled by indexing
    /// and recompression for speed.
    pub parse_http: bool,
    /// Synthesize WARC headers for ARC records.
    pub arc2warc: bool,
    /// Also treat `resource` records as carrying HTTP headers.
    pub ensure_http_headers: bool,
    /// Block size for source reads.
    pub block_size: usize,
    /// Accept only this archive flavor.
    pub known_format: Option<ArchiveFormat>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: Format::Gzip,
            digest_check: DigestCheckKind::Off,
            parse_http: true,
            arc2warc: false,
            ensure_http_headers: false,
            block_size: BLOCK_SIZE,
            known_format: None,
        }
    }
}

/// Digest and budget accounting for the record currently being read.
pub(crate) struct BodyState {
    remaining: u64,
    block_hasher: Option<Hasher>,
    payload_hasher: Option<Hasher>,
    payload_active: bool,
    block_declared: Option<String>,
    payload_declared: Option<String>,
    checker: DigestChecker,
    finalized: bool,
}

impl BodyState {
    fn update(&mut self, data: &[u8]) {
        if let Some(hasher) = &mut self.block_hasher {
            hasher.update(data);
        }

        if self.payload_active {
            if let Some(hasher) = &mut self.payload_hasher {
                hasher.update(data);
            }
        }
    }

    fn finalize(&mut self) -> Result<(), LoadError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        Self::compare(
            "block",
            &self.block_declared,
            &mut self.block_hasher,
            &mut self.checker,
        )?;
        Self::compare(
            "payload",
            &self.payload_declared,
            &mut self.payload_hasher,
            &mut self.checker,
        )?;

        Ok(())
    }

    fn compare(
        label: &str,
        declared: &Option<String>,
        hasher: &mut Option<Hasher>,
        checker: &mut DigestChecker,
    ) -> Result<(), LoadError> {
        let (Some(declared), Some(hasher)) = (declared, hasher) else {
            return Ok(());
        };

        let computed = hasher.finish_digest();

        match declared.parse::<Digest>() {
            Ok(expected) if expected == computed => {
                checker.record_pass();
                Ok(())
            }
            Ok(_expected) => checker.record_problem(format!(
                "{} digest failed: expected {}, computed {}",
                label, declared, computed
            )),
            Err(_) => {
                checker.record_problem(format!("unsupported {} digest '{}'", label, declared))
            }
        }
    }
}

/// Streaming reader of WARC and ARC archives.
///
/// Records are yielded lazily in file order. The iterator cannot resync
/// after a parse error at a record boundary; WARC defines no sync bytes and
/// a false resync would silently corrupt downstream indexes.
pub struct ArchiveIterator<R: Read> {
    input: BufferReader<Decompressor<BufferReader<R>>>,
    member_capable: bool,
    config: ArchiveConfig,
    body: Option<BodyState>,
    record_offset: u64,
    err_count: u64,
    started: bool,
    done: bool,
    pending: Option<PendingRecord>,
}

/// Owned fields of a parsed record header, staged until the caller-visible
/// [`Record`] (which borrows the iterator) is handed out.
struct PendingRecord {
    format: RecordFormat,
    rec_type: RecordType,
    rec_headers: crate::headers::StatusAndHeaders,
    http_headers: Option<crate::headers::StatusAndHeaders>,
    length: u64,
    payload_length: u64,
    offset: u64,
}

impl<R: Read> ArchiveIterator<R> {
    /// Creates an iterator with default configuration, probing for gzip.
    pub fn new(source: R) -> std::io::Result<Self> {
        Self::with_config(source, ArchiveConfig::default())
    }

    pub fn with_config(source: R, config: ArchiveConfig) -> std::io::Result<Self> {
        let inner = BufferReader::with_block_size(source, config.block_size);
        let decompressor = Decompressor::new_with_detection(inner, config.compression)?;
        let member_capable = decompressor.format().supports_concatenation();

        Ok(Self {
            input: BufferReader::with_block_size(decompressor, config.block_size),
            member_capable,
            config,
            body: None,
            record_offset: 0,
            err_count: 0,
            started: false,
            done: false,
            pending: None,
        })
    }

    /// Count of recoverable anomalies seen between records.
    pub fn err_count(&self) -> u64 {
        self.err_count
    }

    /// Byte offset of the most recently yielded record in the source.
    pub fn get_record_offset(&self) -> u64 {
        self.record_offset
    }

    /// Returns the underlying byte source.
    pub fn into_inner(self) -> R {
        self.input.into_inner().into_inner().into_inner()
    }

    /// Advances to the next record.
    ///
    /// The previously yielded record's body is drained first; callers do
    /// not need to read records to the end themselves.
    pub fn next_record(&mut self) -> Result<Option<Record<'_, R>>, GeneralError> {
        if self.done {
            return Ok(None);
        }

        match self.advance() {
            Ok(true) => Ok(Some(self.take_record())),
            Ok(false) => Ok(None),
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    /// Builds the [`Record`] for a pending header staged by [`Self::advance`].
    fn take_record(&mut self) -> Record<'_, R> {
        let pending = self.pending.take().expect("pending record staged by advance");

        Record {
            format: pending.format,
            rec_type: pending.rec_type,
            rec_headers: pending.rec_headers,
            http_headers: pending.http_headers,
            length: pending.length,
            payload_length: pending.payload_length,
            offset: pending.offset,
            archive: self,
        }
    }

    fn advance(&mut self) -> Result<bool, GeneralError> {
        let mut next_line = None;

        if self.started {
            self.drain_body()?;
            self.body = None;

            next_line = self.consume_blank_lines()?;

            if next_line.is_some() && self.member_capable {
                // decoded data continues within the same gzip member
                return Err(LoadError::new(LoadErrorKind::MultiRecordGzipMember)
                    .with_offset(self.record_offset)
                    .into());
            }
        }

        match &next_line {
            Some(line) => {
                self.record_offset = self.input.logical_position() - line.len() as u64;
            }
            None => {
                if self.member_capable {
                    if self.started {
                        if !self.input.get_mut().has_data_left()? {
                            self.done = true;
                            return Ok(false);
                        }

                        self.input.get_mut().start_next_member()?;
                        self.record_offset = self.source_position();
                    } else {
                        self.record_offset = 0;

                        self.input.fill_buffer_if_empty()?;
                        if self.input.rem_length() == 0 {
                            self.done = true;
                            return Ok(false);
                        }
                    }
                } else {
                    self.record_offset = self.input.logical_position();

                    self.input.fill_buffer_if_empty()?;
                    if self.input.rem_length() == 0 {
                        self.done = true;
                        return Ok(false);
                    }
                }
            }
        }

        self.started = true;
        self.parse_record(next_line)
    }

    fn parse_record(&mut self, first_line: Option<Vec<u8>>) -> Result<bool, GeneralError> {
        let parsed = loader::parse_record_header(
            &mut self.input,
            first_line,
            self.config.known_format,
            self.config.arc2warc,
        )
        .map_err(|error| self.with_offset(error))?;

        tracing::trace!(
            rec_type = %parsed.rec_type,
            content_length = parsed.length,
            offset = self.record_offset,
            "read record"
        );

        let mut body = BodyState {
            remaining: parsed.length,
            block_hasher: None,
            payload_hasher: None,
            payload_active: false,
            block_declared: parsed.block_digest.clone(),
            payload_declared: parsed.payload_digest.clone(),
            checker: DigestChecker::new(self.config.digest_check),
            finalized: false,
        };

        if self.config.digest_check.is_enabled() {
            body.block_hasher = Self::make_hasher(
                "block",
                &parsed.block_digest,
                &mut body.checker,
            )?;

            if parsed.check_payload {
                body.payload_hasher = Self::make_hasher(
                    "payload",
                    &parsed.payload_digest,
                    &mut body.checker,
                )?;
            }
        }

        self.body = Some(body);

        let parse_http = self.config.parse_http
            && parsed.length > 0
            && parsed.http_scheme
            && parsed
                .rec_type
                .has_http_headers(self.config.ensure_http_headers);

        let http_headers = if parse_http {
            let prefixes: &[&str] = if parsed.rec_type == RecordType::Request {
                &HTTP_REQUEST_PREFIXES
            } else {
                &HTTP_RESPONSE_PREFIXES
            };
            let parser = StatusAndHeadersParser::new(prefixes.iter().copied(), true);

            let result = {
                let mut cursor = BodyCursor {
                    input: &mut self.input,
                    body: self.body.as_mut().expect("body set above"),
                };

                parser.parse(&mut cursor)
            };

            Some(result.map_err(|error| self.with_offset(error))?)
        } else {
            None
        };

        // HTTP headers are consumed; everything further is payload
        let body = self.body.as_mut().expect("body set above");
        body.payload_active = true;

        let http_len = http_headers.as_ref().map(|h| h.total_len()).unwrap_or(0);

        self.pending = Some(PendingRecord {
            format: parsed.format,
            rec_type: parsed.rec_type,
            rec_headers: parsed.rec_headers,
            http_headers,
            length: parsed.length,
            payload_length: parsed.length.saturating_sub(http_len),
            offset: self.record_offset,
        });

        Ok(true)
    }

    fn make_hasher(
        label: &str,
        declared: &Option<String>,
        checker: &mut DigestChecker,
    ) -> Result<Option<Hasher>, LoadError> {
        let Some(declared) = declared else {
            return Ok(None);
        };

        let name = declared.split(':').next().unwrap_or(declared);

        match name.parse::<AlgorithmName>() {
            Ok(algorithm) => Ok(Some(Hasher::new(algorithm))),
            Err(_) => {
                checker.record_problem(format!("unsupported {} digest '{}'", label, declared))?;
                Ok(None)
            }
        }
    }

    fn with_offset(&self, error: GeneralError) -> GeneralError {
        match error {
            GeneralError::Load(load) => GeneralError::Load(load.with_offset(self.record_offset)),
            other => other,
        }
    }

    /// Position in the raw source corresponding to the next unread byte.
    fn source_position(&self) -> u64 {
        if self.member_capable {
            self.input.get_ref().get_ref().logical_position()
        } else {
            self.input.logical_position()
        }
    }

    fn drain_body(&mut self) -> Result<(), GeneralError> {
        if self.body.is_none() {
            return Ok(());
        }

        let mut buf = [0u8; DRAIN_BUFFER_LENGTH];

        loop {
            let len = self.read_body(&mut buf).map_err(io_to_general)?;

            if len == 0 {
                return Ok(());
            }
        }
    }

    /// Consumes the blank lines separating records.
    ///
    /// A non-blank first line means the previous record's declared length
    /// was wrong; it is skipped with a diagnostic. A later non-blank line
    /// is the next record's statusline and is handed back to the parser.
    fn consume_blank_lines(&mut self) -> Result<Option<Vec<u8>>, GeneralError> {
        let mut first_line = true;

        loop {
            let mut line = Vec::new();
            let len = read_line_limited(&mut self.input, MAX_SEPARATOR_LINE_LENGTH, &mut line)?;

            if len == 0 {
                return Ok(None);
            }

            if line.iter().all(|&b| matches!(b, b'\r' | b'\n')) {
                first_line = false;
                continue;
            }

            if first_line {
                tracing::warn!(
                    offset = self.input.logical_position() - len as u64,
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "unexpected data following record"
                );
                self.err_count += 1;
                first_line = false;
                continue;
            }

            return Ok(Some(line));
        }
    }

    pub(crate) fn read_body(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(body) = self.body.as_mut() else {
            return Ok(0);
        };

        if body.remaining == 0 {
            body.finalize().map_err(LoadError::into_io)?;
            return Ok(0);
        }

        let want = buf
            .len()
            .min(usize::try_from(body.remaining).unwrap_or(usize::MAX));
        let len = self.input.read(&mut buf[..want])?;

        if len == 0 {
            return Err(LoadError::new(LoadErrorKind::UnexpectedEof)
                .with_snippet(format!("record truncated with {} bytes unread", body.remaining))
                .into_io());
        }

        body.update(&buf[..len]);
        body.remaining -= len as u64;

        if body.remaining == 0 {
            body.finalize().map_err(LoadError::into_io)?;
        }

        Ok(len)
    }

    pub(crate) fn body_remaining(&self) -> u64 {
        self.body.as_ref().map(|body| body.remaining).unwrap_or(0)
    }

    pub(crate) fn body_checker(&self) -> Option<&DigestChecker> {
        self.body.as_ref().map(|body| &body.checker)
    }
}

fn io_to_general(error: std::io::Error) -> GeneralError {
    match error.downcast::<LoadError>() {
        Ok(load) => GeneralError::Load(load),
        Err(error) => GeneralError::Io(error),
    }
}

/// Budget-clamped, digest-updating view of the record body.
///
/// Used while parsing embedded HTTP headers so that header bytes count
/// against the record budget and feed the block digest.
struct BodyCursor<'i, R: Read> {
    input: &'i mut BufferReader<Decompressor<BufferReader<R>>>,
    body: &'i mut BodyState,
}

impl<R: Read> Read for BodyCursor<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.body.remaining == 0 {
            return Ok(0);
        }

        let want = buf
            .len()
            .min(usize::try_from(self.body.remaining).unwrap_or(usize::MAX));
        let len = self.input.read(&mut buf[..want])?;

        self.body.update(&buf[..len]);
        self.body.remaining -= len as u64;

        Ok(len)
    }
}

impl<R: Read> BufRead for BodyCursor<'_, R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if self.body.remaining == 0 {
            return Ok(&[]);
        }

        self.input.fill_buffer_if_empty()?;

        let buf = self.input.buffer();
        let upper = buf
            .len()
            .min(usize::try_from(self.body.remaining).unwrap_or(usize::MAX));

        Ok(&buf[..upper])
    }

    fn consume(&mut self, amt: usize) {
        self.body.update(&self.input.buffer()[..amt]);
        self.body.remaining -= amt as u64;
        self.input.consume(amt);
    }
}

/// [`ArchiveIterator`] pinned to the WARC format.
pub struct WarcIterator<R: Read>(ArchiveIterator<R>);

impl<R: Read> WarcIterator<R> {
    pub fn new(source: R) -> std::io::Result<Self> {
        Self::with_config(source, ArchiveConfig::default())
    }

    pub fn with_config(source: R, mut config: ArchiveConfig) -> std::io::Result<Self> {
        config.known_format = Some(ArchiveFormat::Warc);
        Ok(Self(ArchiveIterator::with_config(source, config)?))
    }

    pub fn next_record(&mut self) -> Result<Option<Record<'_, R>>, GeneralError> {
        self.0.next_record()
    }

    pub fn err_count(&self) -> u64 {
        self.0.err_count()
    }

    pub fn get_record_offset(&self) -> u64 {
        self.0.get_record_offset()
    }
}

/// [`ArchiveIterator`] pinned to the ARC format.
pub struct ArcIterator<R: Read>(ArchiveIterator<R>);

impl<R: Read> ArcIterator<R> {
    pub fn new(source: R) -> std::io::Result<Self> {
        Self::with_config(source, ArchiveConfig::default())
    }

    pub fn with_config(source: R, mut config: ArchiveConfig) -> std::io::Result<Self> {
        config.known_format = Some(ArchiveFormat::Arc);
        Ok(Self(ArchiveIterator::with_config(source, config)?))
    }

    pub fn next_record(&mut self) -> Result<Option<Record<'_, R>>, GeneralError> {
        self.0.next_record()
    }

    pub fn err_count(&self) -> u64 {
        self.0.err_count()
    }

    pub fn get_record_offset(&self) -> u64 {
        self.0.get_record_offset()
    }
}
