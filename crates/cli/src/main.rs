//! The main entrypoint for initmount, which just performs global
//! initialization, and then calls out into the library.

use anyhow::Result;

fn run() -> Result<i32> {
    initmount_lib::cli::run_from_iter(std::env::args_os())
}

fn main() {
    initmount_utils::initialize_tracing();
    tracing::trace!("starting {}", initmount_utils::NAME);
    initmount_utils::run_main(run)
}
