//! wasmbox - command-line driver for the compile/link/run pipeline.
//!
//! `run` drives the orchestrator on the current thread and delivers
//! animation frames to a recording surface; `asm` and `vasm` go through the
//! background worker and print the stage result.

mod args;
mod commands;
mod error;
mod output;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use nu_ansi_term::Color;
use tracing_subscriber::{fmt, EnvFilter};
use wasmbox_runtime::HostOutput;

use crate::args::{load_options, Args, Command};
use crate::error::{CliError, Result};
use crate::output::LineBuffer;

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let output = Arc::new(LineBuffer::stdout());
    let result = dispatch(args, Arc::clone(&output)).await;

    if let Err(err) = output.flush() {
        tracing::warn!(error = %err, "failed to flush host output");
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        // Already written to host output.
        Err(CliError::Runtime(_) | CliError::Stage(_)) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {err}", Color::LightRed.paint("Error:"));
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Args, output: Arc<LineBuffer<std::io::Stdout>>) -> Result<()> {
    let mut options = load_options(args.config.as_deref(), &args.overrides)?;
    let host: Arc<dyn HostOutput> = output.clone();

    match args.command {
        Command::Run {
            file,
            frames,
            frame_interval_ms,
        } => {
            if let Some(ms) = frame_interval_ms {
                options.frame_interval_ms = ms;
            }
            let resources = args.resources;
            let delivered = tokio::task::spawn_blocking(move || {
                commands::run(options, &resources, host, &file, frames)
            })
            .await
            .map_err(|err| CliError::Io(std::io::Error::other(err)))??;
            tracing::debug!(frames = delivered, "run finished");
        }
        Command::Asm {
            file,
            triple,
            opt,
            output: path,
        } => {
            let worker = commands::spawn_worker(options, args.resources, host)?;
            let asm = commands::asm(&worker, &file, triple, opt).await;
            drop(worker);
            output.flush()?;
            commands::emit(path.as_deref(), &asm?)?;
        }
        Command::Vasm {
            file,
            flags,
            output: path,
        } => {
            let worker = commands::spawn_worker(options, args.resources, host)?;
            let bin = commands::vasm(&worker, &file, flags).await;
            drop(worker);
            output.flush()?;
            commands::emit(path.as_deref(), &bin?)?;
        }
    }
    Ok(())
}
