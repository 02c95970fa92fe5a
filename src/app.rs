use std::process::ExitCode;

use clap::Parser;

use self::arg::Args;
use self::arg::Command;

pub mod arg;

mod check;
mod extract;
mod index;
mod logging;
mod recompress;

pub fn run() -> ExitCode {
    match run_impl() {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(?error);
            eprintln!("{:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn run_impl() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    self::logging::set_up_logging(args.log_level, args.log_file.as_deref(), args.log_json)?;

    match args.command {
        Command::Index(args) => {
            self::index::index(&args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check(args) => self::check::check(&args),
        Command::Extract(args) => {
            self::extract::extract(&args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Recompress(args) => {
            self::recompress::recompress(&args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
