//! Command line argument definitions
// (c) 2025 The glided developers

use std::net::IpAddr;

use clap::Parser;

use crate::util::TimeFormat;

/// Default listening port; clients must agree, of course.
pub const DEFAULT_PORT: u16 = 5051;

/// Server options
#[derive(Debug, Parser, Clone)]
#[command(author, version, about, infer_long_args(true))]
pub struct CliArgs {
    /// Address to listen on
    #[arg(short = 'a', long, default_value = "0.0.0.0", value_name = "IP")]
    pub address: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Enables detailed debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, conflicts_with = "debug")]
    pub quiet: bool,

    /// Logs, in detail, to the given file (overwriting any existing file of
    /// that name)
    #[arg(short = 'l', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Specifies the time format to use when printing messages
    #[arg(short = 'T', long, value_enum, default_value_t = TimeFormat::Local, value_name = "FORMAT")]
    pub time_format: TimeFormat,
}

impl CliArgs {
    /// Computes the trace level these arguments call for
    pub(crate) fn trace_level(&self) -> &str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}
