use std::process::ExitCode;

fn main() -> ExitCode {
    hearth_cli::run()
}
