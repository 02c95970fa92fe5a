//! Sample archive builders shared by the integration tests.

use std::io::Write;

use warckit::builder::RecordBuilder;
use warckit::fields::FieldMap;
use warckit::headers::StatusAndHeaders;
use warckit::record::RecordType;
use warckit::writer::WarcWriter;

pub const TARGET_URI: &str = "http://example.com/";
pub const REVISIT_PROFILE: &str =
    "http://netpreserve.org/warc/1.0/revisit/identical-payload-digest";

/// Record types of [`sample_warc`] in file order.
pub const SAMPLE_REC_TYPES: [RecordType; 6] = [
    RecordType::Warcinfo,
    RecordType::Warcinfo,
    RecordType::Response,
    RecordType::Request,
    RecordType::Revisit,
    RecordType::Request,
];

fn response_http_headers() -> StatusAndHeaders {
    StatusAndHeaders::new(
        "HTTP/1.0",
        "200 OK",
        FieldMap::from_iter([
            ("Content-Type", "text/plain; charset=\"UTF-8\""),
            ("Custom-Header", "somevalue"),
        ]),
    )
}

fn request_http_headers() -> StatusAndHeaders {
    StatusAndHeaders::new(
        "GET",
        "/ HTTP/1.0",
        FieldMap::from_iter([("User-Agent", "foo"), ("Host", "example.com")]),
    )
}

/// Builds a representative archive: two warcinfo records, a
/// response/request pair, a revisit, and another request.
pub fn sample_warc(gzip: bool) -> Vec<u8> {
    let builder = RecordBuilder::new();
    let mut writer = WarcWriter::new(Vec::new(), gzip);

    for _ in 0..2 {
        let mut warcinfo = builder.create_warcinfo_record(
            Some("temp-example.warc.gz"),
            &[("isPartOf", "example-collection")],
        );
        writer.write_record(&mut warcinfo).unwrap();
    }

    let mut response = builder.create_warc_record(Some(TARGET_URI), RecordType::Response);
    response.set_http_headers(response_http_headers());
    response.set_payload_bytes(b"some\ntext".to_vec());

    let mut request = builder.create_warc_record(None, RecordType::Request);
    request.set_http_headers(request_http_headers());

    writer
        .write_request_response_pair(&mut request, &mut response)
        .unwrap();

    let payload_digest = response
        .rec_headers
        .get("WARC-Payload-Digest")
        .unwrap()
        .to_string();
    let refers_to_date = response.rec_headers.get("WARC-Date").unwrap().to_string();

    let mut revisit = builder.create_revisit_record(
        TARGET_URI,
        REVISIT_PROFILE,
        TARGET_URI,
        &refers_to_date,
        &payload_digest,
        Some(response_http_headers()),
    );
    writer.write_record(&mut revisit).unwrap();

    let mut request = builder.create_warc_record(Some(TARGET_URI), RecordType::Request);
    request.set_http_headers(request_http_headers());
    writer.write_record(&mut request).unwrap();

    writer.finish().unwrap()
}

/// Builds a two-record ARC file: the `filedesc://` file header plus one
/// captured HTTP response.
pub fn sample_arc() -> Vec<u8> {
    let mut out = Vec::new();

    let filedesc_body = b"1 0 LiveWebExample\n";
    write!(
        out,
        "filedesc://live-web-example.arc.gz 127.0.0.1 20170306040348 text/plain {}\n",
        filedesc_body.len()
    )
    .unwrap();
    out.extend_from_slice(filedesc_body);
    out.extend_from_slice(b"\n");

    let response_body: &[u8] =
        b"HTTP/1.0 200 OK\r\nContent-Type: text/html\r\n\r\n<html>example</html>";
    write!(
        out,
        "{} 93.184.216.34 20170306040348 text/html {}\n",
        TARGET_URI,
        response_body.len()
    )
    .unwrap();
    out.extend_from_slice(response_body);
    out.extend_from_slice(b"\n");

    out
}
