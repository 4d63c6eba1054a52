use std::process::ExitCode;

fn main() -> ExitCode {
    shopper_cli::run()
}
