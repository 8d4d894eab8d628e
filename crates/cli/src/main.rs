use std::process::ExitCode;

fn main() -> ExitCode {
    boilerbrain_cli::run()
}
