use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cdx::app;
use cdx::cli::Cli;
use cdx::config::CdxConfig;
use cdx::error::CdxError;
use cdx::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => match err.downcast_ref::<CdxError>() {
            Some(not_found @ CdxError::NotFound(_)) => {
                println!("{not_found}");
                ExitCode::from(not_found.exit_code())
            }
            Some(cdx_err) => {
                eprintln!("cdx error: {err:#}");
                ExitCode::from(cdx_err.exit_code())
            }
            None => {
                eprintln!("cdx error: {err:#}");
                ExitCode::from(1)
            }
        },
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let config = CdxConfig::load()?;
    app::run(cli.command, cli.local, config)
}
