//! Record header loading at an archive record boundary.

use std::io::BufRead;

use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::{
    error::{GeneralError, LoadError, LoadErrorKind},
    fields::FieldMap,
    headers::{StatusAndHeaders, StatusAndHeadersParser},
    io::read_line_limited,
    record::{RecordFormat, RecordType},
};

/// WARC versions accepted on read, newest first.
pub const WARC_VERSIONS: [&str; 4] = ["WARC/1.1", "WARC/1.0", "WARC/0.18", "WARC/0.17"];

/// Statusline prefixes of an embedded HTTP response.
pub const HTTP_RESPONSE_PREFIXES: [&str; 3] = ["HTTP/1.1", "HTTP/1.0", "HTTP/0.9"];

/// Statusline prefixes of an embedded HTTP request.
pub const HTTP_REQUEST_PREFIXES: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "TRACE", "CONNECT", "PATCH",
];

const MAX_STATUSLINE_LENGTH: u64 = 8192;

/// Archive flavor a pinned iterator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Warc,
    Arc,
}

/// A parsed record header block, before the body is read.
#[derive(Debug)]
pub(crate) struct ParsedRecordHeader {
    pub format: RecordFormat,
    pub rec_type: RecordType,
    pub rec_headers: StatusAndHeaders,
    pub length: u64,
    pub block_digest: Option<String>,
    pub payload_digest: Option<String>,
    /// Whether the payload digest applies (not a revisit or later segment).
    pub check_payload: bool,
    /// Whether the target URI has an HTTP scheme.
    pub http_scheme: bool,
}

/// Parses the record header block at the reader's position.
///
/// `first_line` supplies a statusline the caller already consumed.
/// Disambiguation is by protocol prefix: `WARC/x.y` starts a WARC record;
/// a whitespace-separated line leading with a URL and ending in a length
/// is an ARC record header.
pub(crate) fn parse_record_header<R: BufRead + ?Sized>(
    reader: &mut R,
    first_line: Option<Vec<u8>>,
    known_format: Option<ArchiveFormat>,
    arc2warc: bool,
) -> Result<ParsedRecordHeader, GeneralError> {
    let line = match first_line {
        Some(line) => line,
        None => read_first_line(reader)?,
    };

    let text = String::from_utf8_lossy(trim_line(&line)).into_owned();

    if text.starts_with("WARC/") {
        if known_format == Some(ArchiveFormat::Arc) {
            return Err(LoadError::new(LoadErrorKind::WrongRecordFormat)
                .with_snippet(text)
                .into());
        }

        parse_warc_header(reader, line)
    } else if let Some(fields) = split_arc_fields(&text) {
        if known_format == Some(ArchiveFormat::Warc) {
            return Err(LoadError::new(LoadErrorKind::WrongRecordFormat)
                .with_snippet(text)
                .into());
        }

        parse_arc_header(fields, arc2warc)
    } else {
        Err(LoadError::new(LoadErrorKind::StatusLine)
            .with_snippet(snippet(&text))
            .into())
    }
}

fn read_first_line<R: BufRead + ?Sized>(reader: &mut R) -> Result<Vec<u8>, GeneralError> {
    loop {
        let mut line = Vec::new();
        let len = read_line_limited(reader, MAX_STATUSLINE_LENGTH, &mut line)?;

        if len == 0 {
            return Err(LoadError::new(LoadErrorKind::UnexpectedEof).into());
        }

        if !trim_line(&line).is_empty() {
            return Ok(line);
        }
    }
}

fn parse_warc_header<R: BufRead + ?Sized>(
    reader: &mut R,
    first_line: Vec<u8>,
) -> Result<ParsedRecordHeader, GeneralError> {
    let parser = StatusAndHeadersParser::new(WARC_VERSIONS, true);
    let mut rec_headers = parser.parse_continued(reader, Some(first_line))?;

    apply_target_uri_fixups(&mut rec_headers);

    let rec_type = match rec_headers.get("WARC-Type") {
        Some(value) => RecordType::from_str_opt(value).ok_or_else(|| {
            LoadError::new(LoadErrorKind::StatusLine)
                .with_snippet(format!("unknown WARC-Type '{}'", value))
        })?,
        None => {
            return Err(LoadError::new(LoadErrorKind::StatusLine)
                .with_snippet("record has no WARC-Type")
                .into())
        }
    };

    let length = parse_content_length(&rec_headers)?;

    let first_segment = rec_headers
        .get("WARC-Segment-Number")
        .map(|value| value.trim() == "1")
        .unwrap_or(true);

    let http_scheme = rec_headers
        .get("WARC-Target-URI")
        .map(|uri| uri.starts_with("http:") || uri.starts_with("https:"))
        .unwrap_or(false);

    Ok(ParsedRecordHeader {
        format: RecordFormat::Warc,
        rec_type,
        block_digest: rec_headers.get("WARC-Block-Digest").map(str::to_string),
        payload_digest: rec_headers.get("WARC-Payload-Digest").map(str::to_string),
        check_payload: rec_type != RecordType::Revisit && first_segment,
        http_scheme,
        length,
        rec_headers,
    })
}

/// Known bugs in older capture tools leave the target URI wrapped in angle
/// brackets or carrying literal spaces.
fn apply_target_uri_fixups(rec_headers: &mut StatusAndHeaders) {
    let Some(uri) = rec_headers.get("WARC-Target-URI") else {
        return;
    };

    let mut uri = uri.to_string();
    let mut changed = false;

    if uri.len() >= 2 && uri.starts_with('<') && uri.ends_with('>') {
        uri = uri[1..uri.len() - 1].to_string();
        changed = true;
    }

    if uri.contains(' ') {
        uri = uri.replace(' ', "%20");
        changed = true;
    }

    if changed {
        tracing::debug!(uri = %uri, "rewrote malformed WARC-Target-URI");
        rec_headers.headers.replace("WARC-Target-URI", uri);
    }
}

struct ArcFields<'a> {
    uri: &'a str,
    ip: &'a str,
    date: &'a str,
    content_type: &'a str,
    length: &'a str,
}

/// Splits an ARC record header line into its five fields.
///
/// URLs may contain unencoded spaces, so the last four fields are peeled
/// off from the right and the remainder is the URI.
fn split_arc_fields(line: &str) -> Option<ArcFields<'_>> {
    fn rsplit_token(text: &str) -> Option<(&str, &str)> {
        let index = text.rfind(' ')?;
        Some((text[..index].trim_end(), &text[index + 1..]))
    }

    let rest = line.trim_end();
    let (rest, length) = rsplit_token(rest)?;
    let (rest, content_type) = rsplit_token(rest)?;
    let (rest, date) = rsplit_token(rest)?;
    let (uri, ip) = rsplit_token(rest)?;

    if length.is_empty() || !length.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    if date.len() != 14 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    if !uri.contains("://") {
        return None;
    }

    Some(ArcFields {
        uri,
        ip,
        date,
        content_type,
        length,
    })
}

fn parse_arc_header(
    fields: ArcFields<'_>,
    arc2warc: bool,
) -> Result<ParsedRecordHeader, GeneralError> {
    let length: u64 = fields.length.parse().map_err(|error| {
        LoadError::new(LoadErrorKind::InvalidContentLength).with_source(error)
    })?;

    let is_filedesc = fields.uri.starts_with("filedesc://");

    let rec_type = if arc2warc {
        if is_filedesc {
            RecordType::Warcinfo
        } else {
            RecordType::Response
        }
    } else if is_filedesc {
        RecordType::ArcHeader
    } else {
        RecordType::Response
    };

    let rec_headers = if arc2warc {
        synthesize_warc_headers(&fields, rec_type, is_filedesc, length)?
    } else {
        let mut headers = FieldMap::new();
        headers.append("uri", fields.uri);
        headers.append("ip-address", fields.ip);
        headers.append("archive-date", fields.date);
        headers.append("content-type", fields.content_type);
        headers.append("length", fields.length);

        StatusAndHeaders::new("", "", headers)
    };

    Ok(ParsedRecordHeader {
        format: if arc2warc {
            RecordFormat::Arc2Warc
        } else {
            RecordFormat::Arc
        },
        rec_type,
        rec_headers,
        length,
        block_digest: None,
        payload_digest: None,
        check_payload: false,
        http_scheme: fields.uri.starts_with("http:") || fields.uri.starts_with("https:"),
    })
}

fn synthesize_warc_headers(
    fields: &ArcFields<'_>,
    rec_type: RecordType,
    is_filedesc: bool,
    length: u64,
) -> Result<StatusAndHeaders, LoadError> {
    let mut headers = FieldMap::new();

    headers.append("WARC-Type", rec_type.as_str());
    headers.append("WARC-Record-ID", new_record_id());
    headers.append("WARC-Date", arc_date_to_iso(fields.date)?);

    if is_filedesc {
        let filename = fields.uri.trim_start_matches("filedesc://");
        headers.append("WARC-Filename", filename);
    } else {
        headers.append("WARC-Target-URI", fields.uri);
    }

    if !fields.ip.is_empty() && fields.ip != "-" {
        headers.append("WARC-IP-Address", fields.ip);
    }

    headers.append("Content-Type", fields.content_type);
    headers.append("Content-Length", length.to_string());

    Ok(StatusAndHeaders::new("WARC/1.0", "", headers))
}

/// Formats a fresh `urn:uuid` record ID in angle brackets.
pub fn new_record_id() -> String {
    format!("<urn:uuid:{}>", uuid::Uuid::new_v4())
}

/// Converts a 14-digit ARC timestamp to an RFC 3339 date.
pub fn arc_date_to_iso(date: &str) -> Result<String, LoadError> {
    let naive = NaiveDateTime::parse_from_str(date, "%Y%m%d%H%M%S")?;
    let utc = Utc.from_utc_datetime(&naive);

    Ok(utc.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn parse_content_length(rec_headers: &StatusAndHeaders) -> Result<u64, LoadError> {
    let value = rec_headers
        .get("Content-Length")
        .ok_or_else(|| LoadError::new(LoadErrorKind::MissingContentLength))?;

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LoadError::new(LoadErrorKind::InvalidContentLength)
            .with_snippet(value.to_string()));
    }

    value
        .parse()
        .map_err(|error| {
            LoadError::new(LoadErrorKind::InvalidContentLength)
                .with_snippet(value.to_string())
                .with_source(error)
        })
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut line = line;

    while let [rest @ .., last] = line {
        if matches!(last, b'\r' | b'\n') {
            line = rest;
        } else {
            break;
        }
    }

    line
}

fn snippet(text: &str) -> String {
    let upper = text.len().min(32);
    text[..upper].to_string()
}
