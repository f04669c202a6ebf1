//! Entry point for the pmweb REST gateway.
//!
//! Delegates to [`pmwebd::run_daemon`], which loads configuration, serves
//! the metric catalogue over HTTP and blocks until a termination signal.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match pmwebd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "pmwebd: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
