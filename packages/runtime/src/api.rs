//! The pipeline orchestrator.
//!
//! [`Api`] owns the engine, the store every module is instantiated into,
//! the filesystem bridge and the stage-module cache. Construction seeds the
//! filesystem from the sysroot archive, so a constructed `Api` is ready for
//! stage operations.
//!
//! A store only frees instances when it is dropped. Once every process has
//! been released, the filesystem is moved into a fresh store and the old
//! one, with every finished process in it, is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use wasmtime::{Engine, Module, Store, Val, WasmBacktrace};

use crate::canvas::DrawingSurface;
use crate::config::{ApiOptions, AssemblyOptions, CompileOptions, Vasm6502Options};
use crate::error::{Error, Result};
use crate::loader::ResourceLoader;
use crate::memfs::MemFs;
use crate::memory::encode;
use crate::output::{error_message, log_prefix, timing, HostOutput};
use crate::process::Process;
use crate::session::{Footprint, Session};

/// A compiled, not yet instantiated stage module.
pub type StageModule = Module;

/// Flags every compiler invocation shares.
const CLANG_COMMON_ARGS: &[&str] = &[
    "-disable-free",
    "-isysroot",
    "/",
    "-internal-isystem",
    "/include/c++/v1",
    "-internal-isystem",
    "/include",
    "-internal-isystem",
    "/lib/clang/8.0.1/include",
    "-ferror-limit",
    "19",
    "-fmessage-length",
    "80",
    "-fcolor-diagnostics",
];

const STACK_SIZE: u32 = 1024 * 1024;
const LIBDIR: &str = "lib/wasm32-wasi";

/// Fixed paths used by [`Api::compile_link_run`].
pub const TEST_INPUT: &str = "test.cc";
pub const TEST_OBJ: &str = "test.o";
pub const TEST_WASM: &str = "test.wasm";

fn secs(start: Instant, end: Instant) -> String {
    format!("{:.2}", (end - start).as_secs_f64())
}

fn new_store(engine: &Engine, session: Session) -> Store<Session> {
    let mut store = Store::new(engine, session);
    store.limiter(|session| &mut session.footprint);
    store
}

pub struct Api {
    engine: Engine,
    store: Store<Session>,
    loader: Box<dyn ResourceLoader>,
    memfs: MemFs,
    memfs_module: Module,
    modules: HashMap<String, StageModule>,
    options: ApiOptions,

    /// Whether the store holds instances of processes that have finished.
    stale: bool,
}

impl Api {
    /// Load the filesystem module and seed it from the sysroot archive.
    ///
    /// Failures are written to `output` as well as returned.
    pub fn new(
        options: ApiOptions,
        loader: Box<dyn ResourceLoader>,
        output: Arc<dyn HostOutput>,
    ) -> Result<Self> {
        let engine = Engine::default();
        let mut session = Session::new(Arc::clone(&output));
        session.stdin.reset(encode(&options.stdin));
        let mut store = new_store(&engine, session);

        let (memfs, memfs_module) = loader
            .compile(&engine, &options.memfs)
            .and_then(|module| Ok((MemFs::instantiate(&mut store, &module)?, module)))
            .inspect_err(|err| output.write(&error_message(&err.to_string(), None)))?;

        let mut api = Self {
            engine,
            store,
            loader,
            memfs,
            memfs_module,
            modules: HashMap::new(),
            options,
            stale: false,
        };
        let sysroot = api.options.sysroot.clone();
        api.untar(&sysroot)?;
        Ok(api)
    }

    pub fn options(&self) -> &ApiOptions {
        &self.options
    }

    /// Memories held by the current store.
    pub fn footprint(&self) -> Footprint {
        self.store.data().footprint
    }

    pub fn show_timing(&self) -> bool {
        self.options.show_timing
    }

    pub fn set_show_timing(&mut self, show_timing: bool) {
        self.options.show_timing = show_timing;
    }

    /// Replace programs' standard input and rewind it.
    pub fn set_stdin(&mut self, text: &str) {
        self.store.data_mut().stdin.reset(encode(text));
    }

    /// Attach the surface drawing-surface imports render into.
    pub fn post_canvas(&mut self, surface: Box<dyn DrawingSurface>) {
        self.store.data_mut().surface = Some(surface);
    }

    fn write(&self, text: &str) {
        self.store.data().write(text);
    }

    fn host_log(&self, message: &str) {
        self.write(&format!("{}{message}", log_prefix()));
    }

    /// Write an error that has not been reported yet, then return it.
    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        result.inspect_err(|err| self.write(&error_message(&err.to_string(), None)))
    }

    /// Log `message`, run `f`, and mark the line done with optional timing.
    fn host_log_timed<T>(&mut self, message: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = Instant::now();
        self.host_log(&format!("{message}..."));
        let result = f(self);
        let result = self.reported(result)?;
        let end = Instant::now();
        self.write(" done.");
        if self.show_timing() {
            self.write(&format!(" {}\n", timing(&format!("({}s)", secs(start, end)))));
        }
        self.write("\n");
        Ok(result)
    }

    /// Fetch a stage module, compiling it on first use.
    pub fn module(&mut self, name: &str) -> Result<StageModule> {
        if let Some(module) = self.modules.get(name) {
            tracing::debug!(name, "module cache hit");
            return Ok(module.clone());
        }
        let module = self.host_log_timed(&format!("Fetching and compiling {name}"), |api| {
            api.loader.compile(&api.engine, name)
        })?;
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    fn untar(&mut self, name: &str) -> Result<()> {
        let count = self.host_log_timed(&format!("Untarring {name}"), |api| {
            let archive = api.loader.read_buffer(name)?;
            api.memfs.untar(&mut api.store, &archive)
        })?;
        tracing::debug!(name, entries = count, "seeded filesystem");
        Ok(())
    }

    pub fn add_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let result = self.memfs.add_file(&mut self.store, path, contents);
        self.reported(result)
    }

    pub fn add_directory(&mut self, path: &str) -> Result<()> {
        let result = self.memfs.add_directory(&mut self.store, path);
        self.reported(result)
    }

    /// Whether `path` names a file or directory.
    pub fn exists(&mut self, path: &str) -> Result<bool> {
        let result = self.memfs.find(&mut self.store, path);
        Ok(self.reported(result)?.is_some())
    }

    /// Copy a file's bytes out of the filesystem.
    pub fn file_contents(&mut self, path: &str) -> Result<Vec<u8>> {
        let result = self
            .memfs
            .file_contents(&mut self.store, path)
            .map(<[u8]>::to_vec);
        self.reported(result)
    }

    /// Compile `input` to the object file `obj`.
    pub fn compile(&mut self, options: &CompileOptions) -> Result<()> {
        self.add_file(&options.input, &encode(&options.contents))?;
        let clang = self.module(&self.options.clang.clone())?;
        let mut args = vec!["clang", "-cc1", "-emit-obj"];
        args.extend_from_slice(CLANG_COMMON_ARGS);
        let opt = format!("-O{}", options.opt);
        args.extend([opt.as_str(), "-o", options.obj.as_str(), "-x", "c++", options.input.as_str()]);
        self.run(&clang, &args)?;
        Ok(())
    }

    /// Compile `input` to assembly text and return it.
    pub fn compile_to_assembly(&mut self, options: &AssemblyOptions) -> Result<Vec<u8>> {
        self.add_file(&options.input, &encode(&options.contents))?;
        let clang = self.module(&self.options.clang.clone())?;
        let mut args = vec!["clang", "-cc1", "-S"];
        args.extend_from_slice(CLANG_COMMON_ARGS);
        let triple = format!("-triple={}", options.triple);
        let opt = format!("-O{}", options.opt);
        args.extend([
            triple.as_str(),
            "-mllvm",
            "--x86-asm-syntax=intel",
            opt.as_str(),
            "-o",
            options.output.as_str(),
            "-x",
            "c++",
            options.input.as_str(),
        ]);
        self.run(&clang, &args)?;
        self.file_contents(&options.output)
    }

    /// Assemble 6502 source and return the output file.
    pub fn compile_to_6502(&mut self, options: &Vasm6502Options) -> Result<Vec<u8>> {
        self.add_file(&options.input, &encode(&options.contents))?;
        let vasm = self.module(&self.options.vasm.clone())?;
        let mut args = vec!["vasm6502_oldstyle"];
        args.extend(options.flags.iter().map(String::as_str));
        args.extend(["-o", options.output.as_str(), options.input.as_str()]);
        self.run(&vasm, &args)?;
        self.file_contents(&options.output)
    }

    /// Link `obj` against the sysroot's libraries into `wasm`.
    pub fn link(&mut self, obj: &str, wasm: &str) -> Result<()> {
        let lld = self.module(&self.options.lld.clone())?;
        let stack_size = format!("stack-size={STACK_SIZE}");
        let search = format!("-L{LIBDIR}");
        let crt1 = format!("{LIBDIR}/crt1.o");
        let args = [
            "wasm-ld",
            "--no-threads",
            "--export-dynamic",
            "-z",
            stack_size.as_str(),
            search.as_str(),
            crt1.as_str(),
            obj,
            "-lc",
            "-lc++",
            "-lc++abi",
            "-lcanvas",
            "-o",
            wasm,
        ];
        self.run(&lld, &args)?;
        Ok(())
    }

    /// Compile, link and run `contents` as a program.
    ///
    /// Returns the process if it asked to keep receiving animation frames.
    pub fn compile_link_run(&mut self, contents: &str) -> Result<Option<Process>> {
        self.compile(&CompileOptions::new(TEST_INPUT, contents, TEST_OBJ))?;
        self.link(TEST_OBJ, TEST_WASM)?;

        let buffer = self.file_contents(TEST_WASM)?;
        let module = self.host_log_timed(&format!("Compiling {TEST_WASM}"), |api| {
            Ok(Module::new(&api.engine, &buffer)?)
        })?;
        self.run(&module, &[TEST_WASM])
    }

    /// Run `module` as a process with `args` (program name first).
    ///
    /// Returns the process if it asked to keep receiving animation frames;
    /// otherwise the process is released.
    pub fn run(&mut self, module: &StageModule, args: &[&str]) -> Result<Option<Process>> {
        self.host_log(&format!("{}\n", args.join(" ")));
        let start = Instant::now();
        let argv = args.iter().map(|arg| arg.to_string()).collect();
        self.stale = true;
        let process = Process::instantiate(&mut self.store, module, &self.memfs, argv);
        let process = match self.reported(process) {
            Ok(process) => process,
            Err(err) => {
                self.reclaim();
                return Err(err);
            }
        };
        let instantiated = Instant::now();
        let status = process.run(&mut self.store);
        let end = Instant::now();

        self.write("\n");
        if self.show_timing() {
            let text = format!("({}s/{}s)", secs(start, instantiated), secs(instantiated, end));
            self.write(&format!("{}\n", timing(&text)));
        }

        match status {
            Ok(true) => Ok(Some(process)),
            Ok(false) => {
                self.release(&process);
                Ok(None)
            }
            Err(err) => {
                self.release(&process);
                Err(err)
            }
        }
    }

    /// Revoke a process's continuation and drop its state.
    ///
    /// The instance itself is freed once no other process is left.
    pub fn release(&mut self, process: &Process) {
        process.disallow_continuation();
        let id = process.id();
        let session = self.store.data_mut();
        session.processes.remove(&id);
        session.frames.retain(|frame| frame.process != id);
        self.reclaim();
    }

    /// Move the filesystem into a fresh store if the current one only holds
    /// finished processes. On failure the current store is kept.
    fn reclaim(&mut self) {
        let session = self.store.data();
        if !self.stale || !session.processes.is_empty() || !session.frames.is_empty() {
            return;
        }
        if let Err(err) = self.renew_store() {
            tracing::warn!(error = %err, "keeping the current store");
        }
    }

    fn renew_store(&mut self) -> Result<()> {
        let output = Arc::clone(&self.store.data().output);
        let mut store = new_store(&self.engine, Session::new(output));
        let memfs = self.memfs.relocate(&mut self.store, &mut store, &self.memfs_module)?;

        let old = std::mem::replace(&mut self.store, store);
        let before = old.data().footprint;
        let mut session = old.into_data();
        let fresh = self.store.data_mut();
        session.memfs_memory = fresh.memfs_memory;
        session.host_memory = None;
        session.footprint = fresh.footprint;
        *fresh = session;

        self.memfs = memfs;
        self.stale = false;
        tracing::debug!(
            memories = before.memories,
            bytes = before.bytes,
            "moved filesystem into a fresh store"
        );
        Ok(())
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.store.data().frames.is_empty()
    }

    /// Deliver one animation frame to every process that requested one.
    ///
    /// Requests whose process lost its continuation are dropped. A frame
    /// that fails is reported and ends that process's continuation. Returns
    /// the number of frames delivered.
    pub fn animation_frame(&mut self, ms: f64) -> usize {
        let frames = std::mem::take(&mut self.store.data_mut().frames);
        let mut delivered = 0;
        for frame in frames {
            if !frame.is_live() {
                tracing::debug!(process = %frame.process, "dropping stale animation frame");
                continue;
            }
            delivered += 1;
            let results_len = frame.callback.ty(&self.store).results().len();
            let mut results = vec![Val::I32(0); results_len];
            let called = frame
                .callback
                .call(&mut self.store, &[Val::F64(ms.to_bits())], &mut results);
            if let Err(err) = called {
                frame.continuation.store(false, std::sync::atomic::Ordering::Release);
                let stack = err.downcast_ref::<WasmBacktrace>().map(ToString::to_string);
                let err = Error::from(err);
                self.write(&error_message(&err.to_string(), stack.as_deref()));
            }
        }
        delivered
    }
}
