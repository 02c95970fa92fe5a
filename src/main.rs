use std::process::ExitCode;

fn main() -> ExitCode {
    warckit::app::run()
}
