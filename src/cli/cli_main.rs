//! Main CLI entrypoint for glided
// (c) 2025 The glided developers

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser as _;
use tracing::info;

use super::args::CliArgs;
use crate::util::{setup_tracing, tracing_is_initialised};

/// Main CLI entrypoint
///
/// Parses the process arguments, sets up tracing and runs the server until
/// interrupted.
#[must_use]
pub fn cli() -> ExitCode {
    let args = CliArgs::parse();
    cli_inner(&args)
        .inspect_err(|e| {
            if tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
        })
        .map_or(ExitCode::FAILURE, |()| ExitCode::SUCCESS)
}

#[tokio::main]
async fn cli_inner(args: &CliArgs) -> Result<()> {
    setup_tracing(
        args.trace_level(),
        args.log_file.as_ref(),
        args.time_format,
        console::colors_enabled_stderr(),
    )?;

    let addr = SocketAddr::new(args.address, args.port);
    let listener = crate::server::bind(addr).await?;
    tokio::select! {
        result = crate::server::serve(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down");
            Ok(())
        }
    }
}
