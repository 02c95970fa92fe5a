//! Representation and parsing of HTTP-style status + headers blocks.
//!
//! One parser serves both WARC record headers and the HTTP messages
//! embedded in record blocks; the two differ only in their accepted
//! statusline prefixes.

use std::{cell::LazyCell, io::BufRead};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::{
    error::{GeneralError, LoadError, LoadErrorKind},
    fields::FieldMap,
    io::read_line_limited,
};

/// Longest header line accepted before giving up on the block.
const MAX_LINE_LENGTH: u64 = 32768;

/// Cap on a whole header block.
const MAX_BLOCK_LENGTH: u64 = 1 << 20;

/// Percent-encoding set matching RFC 8187 value encoding.
const RFC8187: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// A parsed statusline and ordered header fields.
///
/// `protocol` is the matched statusline prefix (`WARC/1.0`, `HTTP/1.1`, a
/// request method, ...) and `statusline` the remainder of the first line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusAndHeaders {
    pub protocol: String,
    pub statusline: String,
    pub headers: FieldMap,
    total_len: u64,
}

impl StatusAndHeaders {
    pub fn new<P, S>(protocol: P, statusline: S, headers: FieldMap) -> Self
    where
        P: Into<String>,
        S: Into<String>,
    {
        Self {
            protocol: protocol.into(),
            statusline: statusline.into(),
            headers,
            total_len: 0,
        }
    }

    /// Number of bytes the parser consumed for this block, including the
    /// terminating blank line.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Returns the first value of the named header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the value of the named header, or `default` when absent.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.headers.get_or(name, default)
    }

    /// Numeric status code from the statusline, if one leads it.
    pub fn status_code(&self) -> Option<u16> {
        let token = self.statusline.split_whitespace().next()?;
        token.parse().ok()
    }

    /// Returns whether the statusline begins with a 3-digit status code.
    ///
    /// When it does not, the statusline is replaced with `valid_statusline`.
    pub fn validate_statusline(&mut self, valid_statusline: &str) -> bool {
        let valid = self
            .statusline
            .split_whitespace()
            .next()
            .map(|token| token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);

        if !valid {
            self.statusline = valid_statusline.to_string();
        }

        valid
    }

    /// Rewrites the block as a `206 Partial Content` response for the given
    /// byte range.
    pub fn add_range(&mut self, start: u64, part_len: u64, total_len: u64) -> &mut Self {
        self.statusline = "206 Partial Content".to_string();
        self.headers.replace(
            "Content-Range",
            format!("bytes {}-{}/{}", start, start + part_len - 1, total_len),
        );
        self.headers.replace("Content-Length", part_len.to_string());
        self.headers.replace("Accept-Ranges", "bytes");
        self
    }

    fn first_line(&self) -> String {
        if self.statusline.is_empty() {
            self.protocol.clone()
        } else if self.protocol.is_empty() {
            self.statusline.clone()
        } else {
            format!("{} {}", self.protocol, self.statusline)
        }
    }

    /// Serializes the block, applying an optional per-header filter.
    ///
    /// Lines are joined with CRLF and the block ends with a blank line.
    /// The filter may drop a header by returning `None` or rewrite it.
    pub fn to_bytes<F>(&self, filter: F) -> Vec<u8>
    where
        F: Fn(&str, &str) -> Option<(String, String)>,
    {
        let mut buf = Vec::new();

        buf.extend_from_slice(self.first_line().as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            if let Some((name, value)) = filter(name, value) {
                buf.extend_from_slice(name.as_bytes());
                buf.extend_from_slice(b": ");
                buf.extend_from_slice(value.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
        }

        buf.extend_from_slice(b"\r\n");

        buf
    }

    /// Serializes like [`Self::to_bytes`] but guarantees ASCII output.
    ///
    /// Non-ASCII header values are rewritten with RFC 8187 parameter
    /// encoding when the value is parameterized, and percent-encoded whole
    /// otherwise.
    pub fn to_ascii_bytes(&self) -> Vec<u8> {
        self.to_bytes(|name, value| {
            if value.is_ascii() {
                Some((name.to_string(), value.to_string()))
            } else {
                Some((name.to_string(), encode_non_ascii_value(value)))
            }
        })
    }
}

impl std::fmt::Display for StatusAndHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\r\n", self.first_line())?;

        for (name, value) in self.headers.iter() {
            write!(f, "{}: {}\r\n", name, value)?;
        }

        Ok(())
    }
}

/// Rewrites a non-ASCII header value into ASCII.
///
/// `name="Éxamplè"` style parameters become `name*=UTF-8''%...` (RFC 8187);
/// anything that cannot be expressed that way is percent-encoded whole.
fn encode_non_ascii_value(value: &str) -> String {
    let re = LazyCell::new(|| Regex::new(r#"=\s*("[^"]*"|[^;]*)"#).unwrap());

    let rewritten = re.replace_all(value, |caps: &regex::Captures<'_>| {
        let param_value = &caps[1];

        if param_value.is_ascii() {
            caps[0].to_string()
        } else {
            let unquoted = param_value.trim_matches('"');
            format!("*=UTF-8''{}", utf8_percent_encode(unquoted, RFC8187))
        }
    });

    if rewritten.is_ascii() {
        rewritten.into_owned()
    } else {
        utf8_percent_encode(value, RFC8187).to_string()
    }
}

/// Parser for statusline-and-headers blocks.
///
/// Configured with the statusline prefixes the caller expects (such as
/// `WARC/`, `HTTP/`, or request method names). When `verify` is on, a
/// statusline matching no prefix is an error; otherwise the whole line is
/// kept as the protocol.
#[derive(Debug, Clone)]
pub struct StatusAndHeadersParser {
    prefixes: Vec<String>,
    verify: bool,
}

impl StatusAndHeadersParser {
    pub fn new<I, S>(prefixes: I, verify: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            verify,
        }
    }

    /// Parses one block from the reader, consuming through the blank line.
    pub fn parse<R: BufRead + ?Sized>(
        &self,
        reader: &mut R,
    ) -> Result<StatusAndHeaders, GeneralError> {
        self.parse_continued(reader, None)
    }

    /// [Parse](Self::parse) a block whose first line was already consumed.
    pub(crate) fn parse_continued<R: BufRead + ?Sized>(
        &self,
        reader: &mut R,
        first_line: Option<Vec<u8>>,
    ) -> Result<StatusAndHeaders, GeneralError> {
        let mut total_len = 0u64;
        let had_first_line = first_line.is_some();
        let mut line = match first_line {
            Some(line) => line,
            None => {
                let mut line = Vec::new();
                let len = read_line_limited(reader, MAX_LINE_LENGTH, &mut line)?;

                if len == 0 {
                    return Err(LoadError::new(LoadErrorKind::UnexpectedEof).into());
                }
                total_len += len as u64;
                line
            }
        };

        // skip blank lines preceding the statusline
        while !had_first_line && is_blank_line(&line) {
            line.clear();
            let len = read_line_limited(reader, MAX_LINE_LENGTH, &mut line)?;

            if len == 0 {
                return Ok(StatusAndHeaders {
                    total_len,
                    ..Default::default()
                });
            }
            total_len += len as u64;
        }

        let full_statusline = decode_header_line(trim_line_ending(&line));
        let (protocol, statusline) = self.split_statusline(&full_statusline)?;

        let mut result = StatusAndHeaders::new(protocol, statusline, FieldMap::new());

        // name of the header a continuation line may extend; None after a
        // line that was skipped
        let mut last_was_valid = false;

        loop {
            line.clear();
            let len = read_line_limited(reader, MAX_LINE_LENGTH, &mut line)?;

            if len == 0 {
                break;
            }
            total_len += len as u64;

            if total_len > MAX_BLOCK_LENGTH {
                return Err(LoadError::new(LoadErrorKind::HeaderTooBig).into());
            }

            if is_blank_line(&line) {
                break;
            }

            let raw = decode_header_line(trim_line_ending(&line));

            if raw.starts_with(' ') || raw.starts_with('\t') {
                if last_was_valid {
                    result.headers.extend_last_value(raw.trim_start());
                }
                continue;
            }

            match raw.split_once(':') {
                Some((name, value)) => {
                    result
                        .headers
                        .append(name.trim().to_string(), value.trim().to_string());
                    last_was_valid = true;
                }
                None => {
                    // repeated statusline or garbage line; either way there
                    // is no header to record
                    if raw != full_statusline {
                        tracing::debug!(line = %raw, "skipping malformed header line");
                    }
                    last_was_valid = false;
                }
            }
        }

        result.total_len = total_len;

        Ok(result)
    }

    fn split_statusline(&self, line: &str) -> Result<(String, String), LoadError> {
        for prefix in &self.prefixes {
            // prefixes are ASCII, so a case-insensitive byte match also
            // guarantees the split lands on a character boundary
            if line.len() >= prefix.len()
                && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            {
                let remainder = line[prefix.len()..].trim_start();
                return Ok((prefix.clone(), remainder.to_string()));
            }
        }

        if self.verify {
            Err(LoadError::new(LoadErrorKind::StatusLine)
                .with_snippet(format!(
                    "expected status line starting with {:?}, found: {}",
                    self.prefixes, line
                )))
        } else {
            Ok((line.to_string(), String::new()))
        }
    }
}

fn is_blank_line(line: &[u8]) -> bool {
    matches!(line, b"\r\n" | b"\n" | b"\r" | b"")
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut line = line;

    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }

    line
}

/// Decodes header bytes as UTF-8, falling back to ISO-8859-1.
///
/// ISO-8859-1 is total over bytes, so decoding cannot fail outright.
fn decode_header_line(line: &[u8]) -> String {
    match std::str::from_utf8(line) {
        Ok(text) => text.to_string(),
        Err(_) => line.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const STATUS_HEADERS_1: &str = "HTTP/1.0 200 OK\r\n\
        Content-Type: ABC\r\n\
        HTTP/1.0 200 OK\r\n\
        Some: Value\r\n\
        Multi-Line: Value1\r\n\
        \x20\x20\x20\x20Also This\r\n\
        \r\n\
        Body";

    const STATUS_HEADERS_3: &str = "HTTP/1.0 204 Empty\r\n\
        Content-Type: Value\r\n\
        %Invalid%\r\n\
        \tMultiline\r\n\
        Content-Length: 0\r\n\
        \r\n";

    fn parse(prefixes: &[&str], verify: bool, input: &str) -> Result<StatusAndHeaders, GeneralError> {
        StatusAndHeadersParser::new(prefixes.to_vec(), verify)
            .parse(&mut Cursor::new(input.as_bytes()))
    }

    #[test]
    fn test_parse_basic() {
        let result = parse(&["HTTP/1.0"], true, STATUS_HEADERS_1).unwrap();

        assert_eq!(result.protocol, "HTTP/1.0");
        assert_eq!(result.statusline, "200 OK");
        assert_eq!(result.headers.len(), 3);
        assert_eq!(result.get("Content-Type"), Some("ABC"));
        assert_eq!(result.get("Some"), Some("Value"));
        assert_eq!(result.get("Multi-Line"), Some("Value1 Also This"));
        assert_eq!(result.status_code(), Some(200));
    }

    #[test]
    fn test_parse_wrong_prefix() {
        let error = parse(&["Other"], true, STATUS_HEADERS_1).unwrap_err();
        assert!(matches!(
            error.as_load().unwrap().kind(),
            LoadErrorKind::StatusLine
        ));

        let result = parse(&["Other"], false, STATUS_HEADERS_1).unwrap();
        assert_eq!(result.protocol, "HTTP/1.0 200 OK");
        assert_eq!(result.statusline, "");
    }

    #[test]
    fn test_parse_skips_invalid_lines() {
        let result = parse(&["HTTP/1.0"], true, STATUS_HEADERS_3).unwrap();

        assert_eq!(result.statusline, "204 Empty");
        assert_eq!(
            result
                .headers
                .iter()
                .collect::<Vec<_>>(),
            vec![("Content-Type", "Value"), ("Content-Length", "0")]
        );
    }

    #[test]
    fn test_parse_case_insensitive_prefix() {
        let input = STATUS_HEADERS_3.replace("HTTP/1.0", "http/1.0");
        let result = parse(&["HTTP/1.0"], true, &input).unwrap();

        assert_eq!(result.protocol, "HTTP/1.0");
        assert_eq!(result.statusline, "204 Empty");
    }

    #[test]
    fn test_parse_request_line() {
        let input = "GET / HTTP/1.0\r\nFoo: Bar\r\nContent-Length: 0\r\n";
        let result = parse(&["GET"], true, input).unwrap();

        assert_eq!(result.protocol, "GET");
        assert_eq!(result.statusline, "/ HTTP/1.0");
        assert_eq!(
            result.to_string(),
            "GET / HTTP/1.0\r\nFoo: Bar\r\nContent-Length: 0\r\n"
        );
    }

    #[test]
    fn test_parse_empty_input() {
        let error = parse(&[], false, "").unwrap_err();
        assert!(matches!(
            error.as_load().unwrap().kind(),
            LoadErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn test_parse_blank_only_input() {
        let result = parse(&["HTTP/1.0"], true, "\n\n").unwrap();
        assert_eq!(result.protocol, "");
        assert_eq!(result.statusline, "");
        assert!(result.headers.is_empty());
    }

    #[test]
    fn test_parse_one_word() {
        let result = parse(&["GET"], false, "A").unwrap();
        assert_eq!(result.to_string(), "A\r\n");
    }

    #[test]
    fn test_total_len() {
        let input = "HTTP/1.0 200 OK\r\nA: b\r\n\r\nBody";
        let result = parse(&["HTTP/1.0"], true, input).unwrap();
        assert_eq!(result.total_len(), (input.len() - "Body".len()) as u64);
    }

    #[test]
    fn test_to_bytes_filter() {
        let result = parse(&["HTTP/1.0"], true, STATUS_HEADERS_1).unwrap();

        let bytes = result.to_bytes(|name, value| {
            if name.eq_ignore_ascii_case("multi-line") {
                None
            } else {
                Some((name.to_string(), value.to_string()))
            }
        });

        assert_eq!(
            bytes,
            b"HTTP/1.0 200 OK\r\nContent-Type: ABC\r\nSome: Value\r\n\r\n"
        );
    }

    #[test]
    fn test_validate_statusline() {
        let mut ok = StatusAndHeaders::new("", "200 OK", FieldMap::new());
        assert!(ok.validate_statusline("204 No Content"));
        assert_eq!(ok.statusline, "200 OK");

        let mut bad = StatusAndHeaders::new("", "Bad OK", FieldMap::new());
        assert!(!bad.validate_statusline("204 No Content"));
        assert_eq!(bad.statusline, "204 No Content");
    }

    #[test]
    fn test_add_range() {
        let mut result = StatusAndHeaders::new(
            "",
            "200 OK",
            FieldMap::from_iter([("Content-Type", "text/plain")]),
        );
        result.add_range(10, 4, 100);

        assert_eq!(result.statusline, "206 Partial Content");
        assert_eq!(result.get("Content-Range"), Some("bytes 10-13/100"));
        assert_eq!(result.get("Content-Length"), Some("4"));
        assert_eq!(result.get("Accept-Ranges"), Some("bytes"));
    }

    #[test]
    fn test_to_ascii_bytes_parameter() {
        let headers = StatusAndHeaders::new(
            "",
            "200 OK",
            FieldMap::from_iter([("Custom-Header", "attachment; filename=\"Éxamplè\"")]),
        );

        assert_eq!(
            String::from_utf8(headers.to_ascii_bytes()).unwrap(),
            "200 OK\r\nCustom-Header: attachment; filename*=UTF-8''%C3%89xampl%C3%A8\r\n\r\n"
        );
    }

    #[test]
    fn test_to_ascii_bytes_mixed_parameters() {
        let headers = StatusAndHeaders::new(
            "",
            "200 OK",
            FieldMap::from_iter([(
                "Custom-Header",
                "value; filename=\"Éxamplè\"; param; other=испытание; another",
            )]),
        );

        assert_eq!(
            String::from_utf8(headers.to_ascii_bytes()).unwrap(),
            "200 OK\r\nCustom-Header: value; filename*=UTF-8''%C3%89xampl%C3%A8; param; \
            other*=UTF-8''%D0%B8%D1%81%D0%BF%D1%8B%D1%82%D0%B0%D0%BD%D0%B8%D0%B5; another\r\n\r\n"
        );
    }

    #[test]
    fn test_to_ascii_bytes_whole_value() {
        let headers = StatusAndHeaders::new(
            "",
            "200 OK",
            FieldMap::from_iter([("Custom-Header", "\u{201C}max-age=31536000\u{2033}")]),
        );

        assert_eq!(
            String::from_utf8(headers.to_ascii_bytes()).unwrap(),
            "200 OK\r\nCustom-Header: %E2%80%9Cmax-age%3D31536000%E2%80%B3\r\n\r\n"
        );
    }

    #[test]
    fn test_latin1_fallback() {
        let input = b"HTTP/1.0 200 OK\r\nX-Header: caf\xe9\r\n\r\n";
        let result = StatusAndHeadersParser::new(["HTTP/1.0"], true)
            .parse(&mut Cursor::new(&input[..]))
            .unwrap();

        assert_eq!(result.get("X-Header"), Some("café"));
    }
}
