use std::process::ExitCode;

fn main() -> ExitCode {
    match hive_core::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
