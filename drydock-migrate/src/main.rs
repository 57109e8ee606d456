//! drydock Migration CLI Tool
//!
//! Command-line interface for running changelog migrations outside the application:
//! CI/CD pipelines, manual upgrades and clearing stuck locks.

use clap::Parser;
use drydock_migrate::cli::Cli;
use drydock_migrate::commands;
use std::process;

fn main() {
    // .env is optional
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    match commands::run(&cli) {
        Ok(report) => {
            println!("{report}");
            if !cli.quiet {
                println!("✅ Success");
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            process::exit(1);
        }
    }
}
