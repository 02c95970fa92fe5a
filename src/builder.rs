//! Record synthesis for writing.

use std::io::{Read, Write};

use chrono::{SecondsFormat, Utc};

use crate::{
    digest::{AlgorithmName, Digest, Hasher},
    fields::FieldMap,
    headers::StatusAndHeaders,
    loader::new_record_id,
    record::RecordType,
    util::{SpooledBuffer, SPOOL_THRESHOLD},
};

/// Version written when the caller does not pick one.
pub const DEFAULT_WARC_VERSION: &str = "WARC/1.0";

const COPY_BUFFER_LENGTH: usize = 16384;

/// Body of a record to be written.
pub(crate) enum RecordPayload<'a> {
    Empty,
    Bytes(Vec<u8>),
    Spooled(SpooledBuffer),
    /// Streaming payload; the writer spools it when digests or the length
    /// are still unknown.
    Reader(Box<dyn Read + 'a>),
}

impl RecordPayload<'_> {
    fn known_length(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Spooled(spool) => Some(spool.len()),
            Self::Reader(_) => None,
        }
    }
}

/// A record assembled for writing.
///
/// Create one through [`RecordBuilder`]; the writer fills in whatever
/// required headers and digests are still missing when the record is
/// serialized.
pub struct WarcRecord<'a> {
    pub rec_type: RecordType,
    /// The WARC header block; `protocol` carries the version line.
    pub rec_headers: StatusAndHeaders,
    pub http_headers: Option<StatusAndHeaders>,
    pub(crate) payload: RecordPayload<'a>,
    pub(crate) payload_length: Option<u64>,
    pub(crate) http_buf: Option<Vec<u8>>,
}

impl<'a> WarcRecord<'a> {
    pub fn set_http_headers(&mut self, headers: StatusAndHeaders) {
        self.http_buf = None;
        self.http_headers = Some(headers);
    }

    /// Replaces a WARC header field.
    pub fn set_header<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.rec_headers.headers.replace(name, value);
    }

    pub fn set_payload_bytes(&mut self, bytes: Vec<u8>) {
        self.payload_length = Some(bytes.len() as u64);
        self.payload = RecordPayload::Bytes(bytes);
    }

    /// Uses a streaming payload.
    ///
    /// When `length` is unknown, the writer buffers the stream through a
    /// spooled temporary file to compute the length and digests.
    pub fn with_payload_reader<'b>(
        self,
        reader: Box<dyn Read + 'b>,
        length: Option<u64>,
    ) -> WarcRecord<'b>
    where
        'a: 'b,
    {
        WarcRecord {
            rec_type: self.rec_type,
            rec_headers: self.rec_headers,
            http_headers: self.http_headers,
            payload: RecordPayload::Reader(reader),
            payload_length: length,
            http_buf: self.http_buf,
        }
    }

    /// Declared length of the payload, when known.
    pub fn payload_length(&self) -> Option<u64> {
        self.payload.known_length().or(self.payload_length)
    }

    /// The serialized (guaranteed-ASCII) HTTP headers block, cached.
    pub(crate) fn http_buffer(&mut self) -> Option<&[u8]> {
        if self.http_buf.is_none() {
            self.http_buf = self.http_headers.as_ref().map(|h| h.to_ascii_bytes());
        }

        self.http_buf.as_deref()
    }

    /// Buffers a streaming payload so its length is known and it can be
    /// read more than once.
    pub(crate) fn normalize_payload(&mut self) -> std::io::Result<()> {
        if let RecordPayload::Reader(reader) = &mut self.payload {
            let mut spool = SpooledBuffer::with_threshold(SPOOL_THRESHOLD);
            let mut buf = vec![0u8; COPY_BUFFER_LENGTH];

            loop {
                let len = reader.read(&mut buf)?;
                if len == 0 {
                    break;
                }
                spool.write_all(&buf[..len])?;
            }

            self.payload_length = Some(spool.len());
            self.payload = RecordPayload::Spooled(spool);
        }

        Ok(())
    }

    /// Fills `WARC-Block-Digest` and `WARC-Payload-Digest` when absent.
    ///
    /// The block digest covers the serialized HTTP headers followed by the
    /// payload; the payload digest covers the payload only. A revisit
    /// record's block is its HTTP headers alone and its payload digest is
    /// the caller's pointer to the prior capture, never recomputed here.
    pub(crate) fn ensure_digests(&mut self, algorithm: AlgorithmName) -> std::io::Result<()> {
        // An HTTP-scheme record whose headers were not parsed out has an
        // unknown header/payload split, so a payload digest computed here
        // would not match what a parsing reader computes.
        let opaque_http_block = self.http_headers.is_none()
            && self
                .rec_headers
                .get("WARC-Target-URI")
                .map(|uri| uri.starts_with("http:") || uri.starts_with("https:"))
                .unwrap_or(false);

        let need_block = !self.rec_headers.headers.contains_name("WARC-Block-Digest");
        let need_payload = self.rec_type.is_payload_eligible()
            && self.rec_type != RecordType::Revisit
            && !opaque_http_block
            && !self.rec_headers.headers.contains_name("WARC-Payload-Digest");

        if !need_block && !need_payload {
            return Ok(());
        }

        self.normalize_payload()?;
        // cache before hashing so the block digest matches emitted bytes
        self.http_buffer();

        let mut block_hasher = need_block.then(|| Hasher::new(algorithm));
        let mut payload_hasher = need_payload.then(|| Hasher::new(algorithm));

        if let (Some(hasher), Some(http_buf)) = (&mut block_hasher, &self.http_buf) {
            hasher.update(http_buf);
        }

        if self.rec_type != RecordType::Revisit {
            match &mut self.payload {
                RecordPayload::Empty => {}
                RecordPayload::Bytes(bytes) => {
                    if let Some(hasher) = &mut block_hasher {
                        hasher.update(bytes);
                    }
                    if let Some(hasher) = &mut payload_hasher {
                        hasher.update(bytes);
                    }
                }
                RecordPayload::Spooled(spool) => {
                    spool.rewind()?;
                    let mut buf = vec![0u8; COPY_BUFFER_LENGTH];

                    loop {
                        let len = spool.read(&mut buf)?;
                        if len == 0 {
                            break;
                        }
                        if let Some(hasher) = &mut block_hasher {
                            hasher.update(&buf[..len]);
                        }
                        if let Some(hasher) = &mut payload_hasher {
                            hasher.update(&buf[..len]);
                        }
                    }
                }
                RecordPayload::Reader(_) => unreachable!("normalized above"),
            }
        }

        if let Some(hasher) = &mut payload_hasher {
            let digest = Digest::new(algorithm, hasher.finish());
            self.rec_headers
                .headers
                .append("WARC-Payload-Digest", digest.to_string());
        }

        if let Some(hasher) = &mut block_hasher {
            let digest = Digest::new(algorithm, hasher.finish());
            self.rec_headers
                .headers
                .append("WARC-Block-Digest", digest.to_string());
        }

        Ok(())
    }
}

/// Synthesizes records suitable for writing.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    warc_version: String,
    software: String,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self {
            warc_version: DEFAULT_WARC_VERSION.to_string(),
            software: format!("warckit/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the version line written on new records.
    ///
    /// `WARC-Date` gains microsecond precision from `WARC/1.1` on.
    pub fn with_warc_version<S: Into<String>>(mut self, version: S) -> Self {
        self.warc_version = version.into();
        self
    }

    pub fn with_software<S: Into<String>>(mut self, software: S) -> Self {
        self.software = software.into();
        self
    }

    pub fn warc_version(&self) -> &str {
        &self.warc_version
    }

    fn timestamp(&self) -> String {
        let precision = if micro_precision(&self.warc_version) {
            SecondsFormat::Micros
        } else {
            SecondsFormat::Secs
        };

        Utc::now().to_rfc3339_opts(precision, true)
    }

    /// Creates a record with the required headers filled.
    pub fn create_warc_record(
        &self,
        uri: Option<&str>,
        rec_type: RecordType,
    ) -> WarcRecord<'static> {
        let mut headers = FieldMap::new();

        headers.append("WARC-Type", rec_type.as_str());
        headers.append("WARC-Record-ID", new_record_id());
        headers.append("WARC-Date", self.timestamp());

        if let Some(uri) = uri {
            headers.append("WARC-Target-URI", uri);
        }

        WarcRecord {
            rec_type,
            rec_headers: StatusAndHeaders::new(self.warc_version.clone(), "", headers),
            http_headers: None,
            payload: RecordPayload::Empty,
            payload_length: None,
            http_buf: None,
        }
    }

    /// Creates a `warcinfo` record describing the archive file itself.
    ///
    /// `info` fields are serialized as `application/warc-fields` lines;
    /// `software` and `format` are defaulted when not supplied.
    pub fn create_warcinfo_record(
        &self,
        filename: Option<&str>,
        info: &[(&str, &str)],
    ) -> WarcRecord<'static> {
        let mut record = self.create_warc_record(None, RecordType::Warcinfo);

        if let Some(filename) = filename {
            record.set_header("WARC-Filename", filename);
        }

        let mut fields = FieldMap::new();
        fields.append("software", self.software.clone());
        fields.append(
            "format",
            format!(
                "WARC File Format {}",
                self.warc_version.trim_start_matches("WARC/")
            ),
        );

        for (name, value) in info {
            fields.replace(*name, *value);
        }

        let mut body = Vec::new();
        for (name, value) in fields.iter() {
            body.extend_from_slice(name.as_bytes());
            body.extend_from_slice(b": ");
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }

        record.set_payload_bytes(body);
        record
    }

    /// Creates a `revisit` record pointing at a prior capture.
    ///
    /// The payload digest pointer is mandatory; the block is limited to the
    /// HTTP headers of the revisited response.
    pub fn create_revisit_record(
        &self,
        uri: &str,
        profile: &str,
        refers_to_uri: &str,
        refers_to_date: &str,
        payload_digest: &str,
        http_headers: Option<StatusAndHeaders>,
    ) -> WarcRecord<'static> {
        let mut record = self.create_warc_record(Some(uri), RecordType::Revisit);

        record.set_header("WARC-Profile", profile);
        record.set_header("WARC-Refers-To-Target-URI", refers_to_uri);
        record.set_header("WARC-Refers-To-Date", refers_to_date);
        record.set_header("WARC-Payload-Digest", payload_digest);

        if let Some(headers) = http_headers {
            record.set_http_headers(headers);
        }

        record
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn micro_precision(version: &str) -> bool {
    !matches!(version, "WARC/1.0" | "WARC/0.18" | "WARC/0.17")
}
