// src/main.rs
//
// CLI entry point: parse arguments, read the configuration and hand
// off to the simulation driver. Exit code 0 on graceful termination,
// 1 on usage error or missing config.

mod config;
mod kernel;
mod memory;
mod os;
mod process;
mod timer;

use std::path::Path;
use std::process::exit;

use clap::Parser;

/// Deterministic multi-CPU operating-system simulator with
/// paging-based virtual memory.
#[derive(Parser)]
#[command(name = "ossim", version)]
struct Cli {
    /// Name of the configure file under input/
    config: String,
}

fn main() {
    env_logger::init();

    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        exit(1);
    });

    let path = Path::new("input").join(&cli.config);
    let cfg = match config::read_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };

    os::run_simulation(cfg);
}
