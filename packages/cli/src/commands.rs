//! Subcommand implementations.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use wasmbox_runtime::{
    Api, ApiOptions, AssemblyOptions, DirLoader, HostOutput, RecordingSurface, Vasm6502Options,
    WorkerApi,
};

use crate::args::stage_name;
use crate::error::{CliError, Result};

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).map_err(|source| CliError::Read {
        path: file.to_path_buf(),
        source,
    })
}

/// Name a source file gets inside the virtual filesystem.
fn input_name(file: &Path, default: &str) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| default.to_string())
}

/// Write a stage result to `path`, or to stdout.
pub fn emit(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, bytes)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Compile, link and run a program on the calling thread, then deliver up
/// to `frames` animation frames.
///
/// Returns the number of frames delivered.
pub fn run(
    options: ApiOptions,
    resources: &Path,
    output: Arc<dyn HostOutput>,
    file: &Path,
    frames: u32,
) -> Result<usize> {
    let source = read_source(file)?;
    let interval = options.frame_interval();
    let mut api = Api::new(options, Box::new(DirLoader::new(resources)), output)?;

    let surface = RecordingSurface::new();
    api.post_canvas(Box::new(surface.clone()));

    let Some(process) = api.compile_link_run(&source)? else {
        return Ok(0);
    };

    let started = Instant::now();
    let mut delivered = 0;
    for _ in 0..frames {
        if !api.has_pending_frames() {
            break;
        }
        std::thread::sleep(interval);
        delivered += api.animation_frame(started.elapsed().as_secs_f64() * 1000.0);
    }
    api.release(&process);

    tracing::info!(
        frames = delivered,
        draws = surface.recorded().len(),
        "animation finished"
    );
    Ok(delivered)
}

pub async fn asm(
    worker: &WorkerApi,
    file: &Path,
    triple: String,
    opt: String,
) -> Result<Vec<u8>> {
    let options = AssemblyOptions::new(
        input_name(file, "test.cc"),
        stage_name(file, "S"),
        read_source(file)?,
    )
    .with_triple(triple)
    .with_opt(opt);
    worker
        .compile_to_assembly(options)
        .await?
        .ok_or(CliError::Stage("compile"))
}

pub async fn vasm(worker: &WorkerApi, file: &Path, flags: Vec<String>) -> Result<Vec<u8>> {
    let options = Vasm6502Options::new(
        input_name(file, "test.s"),
        stage_name(file, "bin"),
        read_source(file)?,
    )
    .with_flags(flags);
    worker
        .compile_to_6502(options)
        .await?
        .ok_or(CliError::Stage("assemble"))
}

/// Start a worker over the resource directory.
pub fn spawn_worker(
    options: ApiOptions,
    resources: PathBuf,
    output: Arc<dyn HostOutput>,
) -> Result<WorkerApi> {
    Ok(WorkerApi::spawn(
        options,
        Box::new(DirLoader::new(resources)),
        output,
    )?)
}
