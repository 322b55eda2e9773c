use std::process::ExitCode;

fn main() -> ExitCode {
    maimai_cli::run()
}
