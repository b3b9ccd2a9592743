use std::process::ExitCode;

fn main() -> ExitCode {
    relay_cli::run()
}
