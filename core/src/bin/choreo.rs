//! Choreo diagnostics CLI
//!
//! Inspect configuration and run the built-in saga scenario against the
//! engine without an interpreter in front of it.

use choreo_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
