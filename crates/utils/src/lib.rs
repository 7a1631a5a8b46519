//! The inevitable catchall "utils" crate. Generally only add
//! things here that only depend on the standard library and
//! "core" crates.
//!
mod command;
pub use command::*;
mod tracing_util;
pub use tracing_util::*;

/// The name of our binary
pub const NAME: &str = "initmount";

/// Exit status of a process whose entry point returned an error. Positive
/// codes are reserved for builtin results (the bulk-mount child uses `1`).
pub const ERROR_EXIT_STATUS: i32 = -1;

/// Intended for use in `main`, calls an inner function and
/// handles errors by printing them.
///
/// The inner function yields the signed status of an init builtin;
/// a non-zero status becomes the process exit code (the kernel keeps
/// only the low byte, so `-1` is observed as 255). An error exits with
/// [`ERROR_EXIT_STATUS`].
pub fn run_main<F>(f: F)
where
    F: FnOnce() -> anyhow::Result<i32>,
{
    use std::io::Write as _;

    use owo_colors::OwoColorize;

    match f() {
        Ok(0) => {}
        Ok(status) => std::process::exit(status),
        Err(e) => {
            let mut stderr = anstream::stderr();
            // Don't panic if writing fails.
            let _ = writeln!(stderr, "{}{:#}", "error: ".red(), e);
            std::process::exit(ERROR_EXIT_STATUS);
        }
    }
}
