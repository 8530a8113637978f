//! # wasmbox runtime
//!
//! Runs precompiled WebAssembly tools (a C++ compiler, a linker, an
//! assembler) and the programs they produce as if each were an OS process,
//! all inside one host.
//!
//! ## Core Concepts
//!
//! ### Processes
//!
//! A [`Process`] is one instance of a stage module with its own linear
//! memory, argument vector and environment. It imports a small system-call
//! surface (`proc_exit`, `args_get`, `random_get`, ...) plus a set of
//! drawing-surface calls, and finishes by calling `proc_exit`. Exiting with
//! [`RAF_PROC_EXIT_CODE`] keeps the process alive for animation frames.
//!
//! ### The Filesystem Module
//!
//! Files live inside a separate sandboxed module ("memfs") with its own
//! memory. Processes reach them through syscalls memfs exports; memfs calls
//! back into the host to copy bytes between its memory and the calling
//! process's memory. [`MemFs`] is the host side of that bridge, and it is
//! seeded at startup from a tar archive (see [`tar`]).
//!
//! ### The Pipeline
//!
//! [`Api`] caches stage modules by name and sequences them: compile to an
//! object file, link to an executable module, then load and run it. Progress
//! and diagnostics are written as text (with ANSI colors) to a
//! [`HostOutput`] sink.
//!
//! ### Running Off-Thread
//!
//! [`WorkerApi`] moves an [`Api`] onto a worker thread and correlates each
//! call with its response by id, with optional per-request timeouts.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wasmbox_runtime::{Api, ApiOptions, AssemblyOptions, BufferedOutput, DirLoader};
//!
//! let output = BufferedOutput::new();
//! let mut api = Api::new(
//!     ApiOptions::default(),
//!     Box::new(DirLoader::new("resources")),
//!     Arc::new(output.clone()),
//! )?;
//!
//! let asm = api.compile_to_assembly(&AssemblyOptions::new(
//!     "test.cc",
//!     "test.S",
//!     "int main() { return 0; }",
//! ))?;
//! print!("{}", output.take());
//! ```

pub mod api;
pub mod canvas;
pub mod config;
pub mod error;
pub mod loader;
pub mod memfs;
pub mod memory;
pub mod output;
pub mod process;
pub mod session;
pub mod tar;
pub mod worker;

pub use api::{Api, StageModule, TEST_INPUT, TEST_OBJ, TEST_WASM};
pub use canvas::{
    CanvasCall, DrawCommand, DrawingSurface, FillRule, HandleTable, ImageData, LineCap, LineJoin,
    Recorded, RecordingSurface, TextAlign, TextBaseline,
};
pub use config::{ApiOptions, AssemblyOptions, CompileOptions, Vasm6502Options};
pub use error::{Error, Result};
pub use loader::{DirLoader, MemoryLoader, ResourceLoader};
pub use memfs::{gather_iovecs, MemFs, Stdin};
pub use memory::{GuestMemory, MemoryView};
pub use output::{BufferedOutput, HostOutput};
pub use process::{ExitStatus, Process, Syscall, RAF_PROC_EXIT_CODE};
pub use session::{Footprint, ProcessId, Session};
pub use worker::{Message, Request, RouterError, WorkerApi};
