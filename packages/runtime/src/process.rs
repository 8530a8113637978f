//! One running instance of a stage module.
//!
//! A [`Process`] gets its own linear memory, argument vector and
//! environment, and imports the system-call surface bound here plus the
//! syscalls the filesystem module exports. `proc_exit` is the only way a
//! program finishes: it unwinds out of `_start` carrying its exit code, and
//! [`Process::start`] turns that into an [`ExitStatus`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use wasmtime::{Caller, Extern, Linker, Module, Store, TypedFunc, WasmBacktrace};

use crate::canvas;
use crate::error::{Error, Result};
use crate::memfs::{MemFs, ESUCCESS, SYSCALL_MODULE};
use crate::memory::{GuestMemory, MemoryView};
use crate::output::error_message;
use crate::session::{ProcessId, ProcessSlot, Session};

/// Exit code meaning "finished, but keep delivering animation frames".
pub const RAF_PROC_EXIT_CODE: i32 = 0xC0C0A;

/// Unwinding payload of `proc_exit`. Never escapes [`Process::start`].
#[derive(Debug, thiserror::Error)]
#[error("process exited with code {code}.")]
pub(crate) struct ProcExit {
    code: i32,
}

/// How a program's entry point finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited with the continuation code; animation frames stay allowed.
    Continue(i32),
    /// Exited with code 0.
    Exited,
    /// Exited with a failing code.
    Failed(i32),
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            RAF_PROC_EXIT_CODE => ExitStatus::Continue(code),
            0 => ExitStatus::Exited,
            code => ExitStatus::Failed(code),
        }
    }
}

/// The process-control imports every program links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Syscall {
    ProcExit,
    EnvironSizesGet,
    EnvironGet,
    ArgsSizesGet,
    ArgsGet,
    RandomGet,
    ClockTimeGet,
    PollOneoff,
}

impl Syscall {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

type Host<'a> = Caller<'a, Session>;

/// Resolve the memory of the instance making a host call.
pub(crate) fn caller_memory(caller: &mut Host<'_>) -> wasmtime::Result<GuestMemory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .map(GuestMemory::new)
        .ok_or_else(|| {
            Error::MissingExport {
                module: "caller".to_string(),
                name: "memory".to_string(),
            }
            .into_trap()
        })
}

fn bind(linker: &mut Linker<Session>, call: Syscall, process: ProcessId) -> Result<()> {
    let name = call.name();
    let m = SYSCALL_MODULE;
    match call {
        Syscall::ProcExit => linker.func_wrap(m, name, |_: Host<'_>, code: i32| -> wasmtime::Result<()> {
            Err(wasmtime::Error::new(ProcExit { code }))
        }),
        Syscall::EnvironSizesGet => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, count_out: u32, size_out: u32| -> wasmtime::Result<i32> {
                with_slot(&mut c, process, |view, slot| {
                    let size: usize = slot.environ.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
                    view.write64(count_out, slot.environ.len() as u32, 0)?;
                    view.write64(size_out, size as u32, 0)?;
                    Ok(ESUCCESS)
                })
            },
        ),
        Syscall::EnvironGet => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, ptrs: u32, buf: u32| -> wasmtime::Result<i32> {
                with_slot(&mut c, process, |view, slot| {
                    let entries = slot.environ.iter().map(|(k, v)| format!("{k}={v}"));
                    write_table(view, ptrs, buf, entries)?;
                    Ok(ESUCCESS)
                })
            },
        ),
        Syscall::ArgsSizesGet => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, argc_out: u32, size_out: u32| -> wasmtime::Result<i32> {
                with_slot(&mut c, process, |view, slot| {
                    let size: usize = slot.argv.iter().map(|arg| arg.len() + 1).sum();
                    view.write64(argc_out, slot.argv.len() as u32, 0)?;
                    view.write64(size_out, size as u32, 0)?;
                    Ok(ESUCCESS)
                })
            },
        ),
        Syscall::ArgsGet => linker.func_wrap(
            m,
            name,
            move |mut c: Host<'_>, ptrs: u32, buf: u32| -> wasmtime::Result<i32> {
                with_slot(&mut c, process, |view, slot| {
                    write_table(view, ptrs, buf, slot.argv.iter())?;
                    Ok(ESUCCESS)
                })
            },
        ),
        Syscall::RandomGet => linker.func_wrap(
            m,
            name,
            |mut c: Host<'_>, buf: u32, len: u32| -> wasmtime::Result<i32> {
                let memory = caller_memory(&mut c)?;
                let mut bytes = vec![0u8; len as usize];
                rand::thread_rng().fill(&mut bytes[..]);
                memory.view(&mut c).write(buf, &bytes).map_err(Error::into_trap)?;
                Ok(ESUCCESS)
            },
        ),
        Syscall::ClockTimeGet => linker.func_wrap(
            m,
            name,
            |_: Host<'_>, _clock: i32, _precision: i64, _out: i32| -> wasmtime::Result<i32> {
                Err(not_implemented("clock_time_get"))
            },
        ),
        Syscall::PollOneoff => linker.func_wrap(
            m,
            name,
            |_: Host<'_>, _in: i32, _out: i32, _count: i32, _events: i32| -> wasmtime::Result<i32> {
                Err(not_implemented("poll_oneoff"))
            },
        ),
    }?;
    Ok(())
}

fn not_implemented(field: &'static str) -> wasmtime::Error {
    Error::NotImplemented {
        module: SYSCALL_MODULE,
        field,
    }
    .into_trap()
}

/// Run `f` with the caller's memory and its process slot.
fn with_slot(
    caller: &mut Host<'_>,
    process: ProcessId,
    f: impl FnOnce(&mut MemoryView<'_>, &ProcessSlot) -> Result<i32>,
) -> wasmtime::Result<i32> {
    let memory = caller_memory(caller)?;
    let (mut view, session) = memory.view_with_data(caller);
    let slot = session.process(process).map_err(Error::into_trap)?;
    f(&mut view, slot).map_err(Error::into_trap)
}

/// Write `items` as NUL-terminated strings from `buf`, with a pointer to
/// each at `ptrs` and a null pointer after the last.
fn write_table<S: AsRef<str>>(
    view: &mut MemoryView<'_>,
    mut ptrs: u32,
    mut buf: u32,
    items: impl IntoIterator<Item = S>,
) -> Result<()> {
    for item in items {
        view.write32(ptrs, buf)?;
        ptrs = ptrs.wrapping_add(4);
        buf = buf.wrapping_add(view.write_str(buf, item.as_ref())?);
    }
    view.write32(ptrs, 0)
}

/// An instantiated program.
pub struct Process {
    id: ProcessId,
    memory: GuestMemory,
    entry: TypedFunc<(), ()>,
    continuation: Arc<AtomicBool>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Process {
    /// Instantiate `module` into `store` with `argv` (program name first).
    pub fn instantiate(
        store: &mut Store<Session>,
        module: &Module,
        memfs: &MemFs,
        argv: Vec<String>,
    ) -> Result<Self> {
        let id = ProcessId::new();
        let slot = ProcessSlot::new(argv);
        let continuation = Arc::clone(&slot.continuation);
        store.data_mut().processes.insert(id, slot);

        match Self::link(store, module, memfs, id) {
            Ok((memory, entry)) => Ok(Self {
                id,
                memory,
                entry,
                continuation,
            }),
            Err(err) => {
                store.data_mut().processes.remove(&id);
                Err(err)
            }
        }
    }

    fn link(
        store: &mut Store<Session>,
        module: &Module,
        memfs: &MemFs,
        id: ProcessId,
    ) -> Result<(GuestMemory, TypedFunc<(), ()>)> {
        let mut linker = Linker::new(store.engine());
        linker.allow_shadowing(true);
        for call in Syscall::iter() {
            bind(&mut linker, call, id)?;
        }
        canvas::bind(&mut linker, id)?;
        // Filesystem syscalls win over same-named bindings above.
        memfs.link_syscalls(store, &mut linker)?;

        let instance = linker.instantiate(&mut *store, module)?;
        let missing = |name: &str| Error::MissingExport {
            module: "program".to_string(),
            name: name.to_string(),
        };
        let memory = instance
            .get_memory(&mut *store, "memory")
            .map(GuestMemory::new)
            .ok_or_else(|| missing("memory"))?;
        let entry = instance
            .get_func(&mut *store, "_start")
            .ok_or_else(|| missing("_start"))?
            .typed::<(), ()>(&*store)?;
        Ok((memory, entry))
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn memory(&self) -> GuestMemory {
        self.memory
    }

    pub fn continuation_allowed(&self) -> bool {
        self.continuation.load(Ordering::Acquire)
    }

    /// Stop this process from receiving further animation frames.
    pub fn disallow_continuation(&self) {
        self.continuation.store(false, Ordering::Release);
    }

    /// Call the entry point.
    ///
    /// Returning normally from `_start` counts as exiting with code 0. Any
    /// failure other than `proc_exit` is returned as-is.
    pub fn start(&self, store: &mut Store<Session>) -> std::result::Result<ExitStatus, wasmtime::Error> {
        match self.entry.call(&mut *store, ()) {
            Ok(()) => Ok(ExitStatus::Exited),
            Err(err) => match err.downcast_ref::<ProcExit>() {
                Some(exit) => Ok(ExitStatus::from_code(exit.code)),
                None => Err(err),
            },
        }
    }

    /// Run the program and apply the exit policy.
    ///
    /// Returns whether the process keeps receiving animation frames. Errors
    /// are written to host output before they are returned.
    pub fn run(&self, store: &mut Store<Session>) -> Result<bool> {
        let status = match self.start(store) {
            Ok(status) => status,
            Err(err) => {
                self.disallow_continuation();
                let stack = err.downcast_ref::<WasmBacktrace>().map(ToString::to_string);
                let err = Error::from(err);
                store
                    .data()
                    .write(&error_message(&err.to_string(), stack.as_deref()));
                return Err(err);
            }
        };

        match status {
            ExitStatus::Continue(_) => {
                tracing::debug!(process = %self.id, "allowing animation frames after exit");
                Ok(true)
            }
            ExitStatus::Exited => {
                tracing::debug!(process = %self.id, "disallowing animation frames, exit code 0");
                self.disallow_continuation();
                Ok(false)
            }
            ExitStatus::Failed(code) => {
                tracing::debug!(process = %self.id, code, "disallowing animation frames");
                self.disallow_continuation();
                let err = Error::Exit { code };
                store.data().write(&error_message(&err.to_string(), None));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_names_match_the_import_surface() {
        let names: Vec<&str> = Syscall::iter().map(Syscall::name).collect();
        assert_eq!(
            names,
            vec![
                "proc_exit",
                "environ_sizes_get",
                "environ_get",
                "args_sizes_get",
                "args_get",
                "random_get",
                "clock_time_get",
                "poll_oneoff",
            ]
        );
    }

    #[test]
    fn exit_codes_map_to_statuses() {
        assert_eq!(ExitStatus::from_code(0), ExitStatus::Exited);
        assert_eq!(
            ExitStatus::from_code(RAF_PROC_EXIT_CODE),
            ExitStatus::Continue(RAF_PROC_EXIT_CODE)
        );
        assert_eq!(ExitStatus::from_code(3), ExitStatus::Failed(3));
        assert_eq!(ExitStatus::from_code(-1), ExitStatus::Failed(-1));
    }

    #[test]
    fn table_layout_has_pointers_then_strings() {
        let mut mem = vec![0xaau8; 64];
        let mut view = MemoryView::new(&mut mem);
        write_table(&mut view, 0, 16, ["ab", "c"]).unwrap();

        assert_eq!(view.read32(0).unwrap(), 16);
        assert_eq!(view.read32(4).unwrap(), 19);
        assert_eq!(view.read32(8).unwrap(), 0);
        assert_eq!(view.bytes(16, 5).unwrap(), b"ab\0c\0");
    }
}
