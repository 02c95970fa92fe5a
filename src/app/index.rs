use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use serde_json::{Map, Value};

use crate::archive::{ArchiveConfig, ArchiveIterator};
use crate::record::Record;

use super::arg::IndexCommand;

pub fn index(args: &IndexCommand) -> anyhow::Result<()> {
    let fields: Vec<String> = args
        .fields
        .split(',')
        .map(|field| field.trim().to_string())
        .filter(|field| !field.is_empty())
        .collect();

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    for input in &args.inputs {
        index_one(input, &fields, &mut output)?;
    }

    output.flush()?;

    Ok(())
}

fn index_one(input: &str, fields: &[String], output: &mut dyn Write) -> anyhow::Result<()> {
    let source: Box<dyn Read> = if input == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(File::open(input)?)
    };

    // embedded HTTP messages are only worth parsing when requested
    let config = ArchiveConfig {
        parse_http: fields.iter().any(|field| field.starts_with("http:")),
        arc2warc: true,
        ..Default::default()
    };

    let mut archive = ArchiveIterator::with_config(source, config)?;
    let filename = Path::new(input)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string());

    while let Some(record) = archive.next_record()? {
        let entry = index_entry(&record, fields, &filename);
        serde_json::to_writer(&mut *output, &Value::Object(entry))?;
        output.write_all(b"\n")?;
    }

    Ok(())
}

fn index_entry<R: Read>(
    record: &Record<'_, R>,
    fields: &[String],
    filename: &str,
) -> Map<String, Value> {
    let mut entry = Map::new();

    for field in fields {
        let value = match field.as_str() {
            "offset" => Some(Value::from(record.offset())),
            "length" => Some(Value::from(record.length())),
            "filename" => Some(Value::from(filename)),
            "http:status" => record
                .http_headers()
                .and_then(|headers| headers.status_code())
                .map(Value::from),
            name if name.starts_with("http:") => record
                .http_headers()
                .and_then(|headers| headers.get(&name["http:".len()..]))
                .map(Value::from),
            name => record.rec_headers().get(name).map(Value::from),
        };

        if let Some(value) = value {
            entry.insert(field.clone(), value);
        }
    }

    entry
}
