use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match ldmsd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr().lock(), "ldmsd: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
