use crate::recompress::Recompressor;

use super::arg::RecompressCommand;

pub fn recompress(args: &RecompressCommand) -> anyhow::Result<()> {
    let stats = Recompressor::new(&args.input, &args.output).recompress()?;

    if args.verbose {
        println!(
            "{} records read and recompressed to file: {}",
            stats.count,
            args.output.display()
        );

        if stats.fixed {
            println!("Compression errors found and fixed");
        } else {
            println!("No errors found");
        }
    }

    Ok(())
}
