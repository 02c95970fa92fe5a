use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
};

use anyhow::Context;

use crate::archive::{ArchiveConfig, ArchiveIterator};

use super::arg::ExtractCommand;

pub fn extract(args: &ExtractCommand) -> anyhow::Result<()> {
    let mut file = File::open(&args.file)?;
    file.seek(SeekFrom::Start(args.offset))?;

    // the full-record dump keeps the body verbatim; only the payload view
    // needs the embedded HTTP headers parsed off
    let config = ArchiveConfig {
        parse_http: args.payload || args.headers,
        ..Default::default()
    };

    let mut archive = ArchiveIterator::with_config(file, config)?;
    let mut record = archive
        .next_record()?
        .context("no record at the given offset")?;

    let stdout = std::io::stdout();
    let mut output = stdout.lock();

    if args.headers {
        write_headers(&record, &mut output)?;
    } else if args.payload {
        let mut content = record.content_reader()?;
        copy(&mut content, &mut output)?;
    } else {
        write_headers(&record, &mut output)?;
        copy(&mut record, &mut output)?;
    }

    output.flush()?;

    Ok(())
}

fn write_headers<R: Read>(
    record: &crate::record::Record<'_, R>,
    output: &mut dyn Write,
) -> std::io::Result<()> {
    let keep = |name: &str, value: &str| Some((name.to_string(), value.to_string()));

    output.write_all(&record.rec_headers().to_bytes(keep))?;

    if let Some(http_headers) = record.http_headers() {
        output.write_all(&http_headers.to_bytes(keep))?;
    }

    Ok(())
}

fn copy<R: Read + ?Sized>(source: &mut R, output: &mut dyn Write) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];

    loop {
        let len = source.read(&mut buf)?;

        if len == 0 {
            return Ok(());
        }

        output.write_all(&buf[..len])?;
    }
}
