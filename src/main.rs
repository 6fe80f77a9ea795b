//! Package OCI - Main Entry Point
//!
//! Pushes a package directory to an OCI registry or pulls it back.

use clap::Parser;
use package_oci::cli::{Args, Runner};
use package_oci::{Logger, PackageError};
use std::process::ExitCode;

/// Exit status after Ctrl-C, as shells report SIGINT
const EXIT_CANCELLED: u8 = 130;
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(message) = args.validate() {
        Logger::default().error(&message);
        return ExitCode::from(EXIT_USAGE);
    }

    let runner = Runner::new(args);
    match runner.run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(PackageError::Cancelled) => {
            runner.logger().error("Operation cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            runner.logger().error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
