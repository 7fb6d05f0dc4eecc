use std::process::ExitCode;

fn main() -> ExitCode {
    deedline_cli::run()
}
