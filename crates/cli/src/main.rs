use std::process::ExitCode;

fn main() -> ExitCode {
    savor_cli::run()
}
