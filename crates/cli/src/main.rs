use std::process::ExitCode;

fn main() -> ExitCode {
    santa_cli::run()
}
