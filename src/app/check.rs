use std::{
    fs::File,
    io::Read,
    process::ExitCode,
};

use crate::archive::{ArchiveConfig, ArchiveIterator};
use crate::digest::DigestCheckKind;
use crate::record::RecordType;

use super::arg::CheckCommand;

pub fn check(args: &CheckCommand) -> anyhow::Result<ExitCode> {
    let mut failed = false;

    for input in &args.inputs {
        match check_one(input, args.verbose) {
            Ok(file_failed) => failed |= file_failed,
            Err(error) => {
                println!("{}", input);
                println!("  saw exception while loading: {}", error);
                println!("  skipping rest of file");
                failed = true;
            }
        }
    }

    if failed {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn check_one(input: &str, verbose: bool) -> anyhow::Result<bool> {
    let source: Box<dyn Read> = if input == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(File::open(input)?)
    };

    let config = ArchiveConfig {
        digest_check: DigestCheckKind::Silent,
        ..Default::default()
    };

    let mut archive = ArchiveIterator::with_config(source, config)?;
    let mut failed = false;
    let mut printed_filename = false;

    while let Some(mut record) = archive.next_record()? {
        let digest_present = record.has_digest();
        let rec_type = record.rec_type();
        let rec_id = record
            .rec_headers()
            .get("WARC-Record-ID")
            .unwrap_or("-")
            .to_string();
        let offset = record.offset();

        drain(&mut record)?;

        let mut message = None;
        let mut problems = Vec::new();

        match record.digest_passed() {
            Some(false) => {
                failed = true;
                problems = record.digest_problems();
            }
            Some(true) if verbose => message = Some("digest pass".to_string()),
            None if verbose => {
                message = Some(if digest_present && rec_type == RecordType::Revisit {
                    "digest present but not checked (revisit)".to_string()
                } else if digest_present {
                    "digest present but not checked".to_string()
                } else {
                    "no digest to check".to_string()
                });
            }
            _ => {}
        }

        if message.is_some() || !problems.is_empty() {
            if !printed_filename {
                println!("{}", input);
                printed_filename = true;
            }

            println!("  offset {} WARC-Record-ID {} {}", offset, rec_id, rec_type);

            if let Some(message) = message {
                println!("    {}", message);
            }

            for problem in problems {
                println!("    {}", problem);
            }
        }
    }

    Ok(failed)
}

fn drain<R: Read>(record: &mut R) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];

    loop {
        if record.read(&mut buf)? == 0 {
            return Ok(());
        }
    }
}
