//! mpworker CLI
//!
//! Runs a demo counter worker in a forked execution context until it is
//! interrupted, and prints the effective configuration.

use mpworker::{cli, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init_tracing();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
