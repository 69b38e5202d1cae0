use std::process::ExitCode;

fn main() -> ExitCode {
    renobudget_cli::run()
}
