//! Bridge to the sandboxed filesystem module.
//!
//! The filesystem ("memfs") is itself a WebAssembly module with its own
//! linear memory. Files live in that memory; programs reach them through the
//! syscalls memfs exports, which call back into the host (`host_write`,
//! `host_read`, `copy_in`, `copy_out`) to move bytes between the calling
//! program's memory and memfs memory.

use wasmtime::{Caller, Func, Instance, Linker, Module, Mutability, Store, Val};

use crate::error::{Error, Result};
use crate::memory::{encode, GuestMemory, MemoryView};
use crate::process::caller_memory;
use crate::session::Session;
use crate::tar::TreeBuilder;

/// Import namespace memfs expects its host functions in.
pub const MEMFS_MODULE: &str = "env";

/// Import namespace programs expect system calls in.
pub const SYSCALL_MODULE: &str = "wasi_unstable";

pub const ESUCCESS: i32 = 0;

/// Preset standard input, drained by `host_read`.
///
/// The cursor only moves forward until the input is replaced.
#[derive(Debug, Default, Clone)]
pub struct Stdin {
    input: Vec<u8>,
    pos: usize,
}

impl Stdin {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into(),
            pos: 0,
        }
    }

    /// Replace the input and rewind the cursor.
    pub fn reset(&mut self, input: impl Into<Vec<u8>>) {
        *self = Self::new(input);
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    /// Fill the `iovs_len` iovecs at `iovs` from the unread input.
    ///
    /// Filling stops at the first iovec that cannot be filled completely,
    /// even when later iovecs exist. Returns the number of bytes read.
    pub fn read_into(&mut self, view: &mut MemoryView<'_>, iovs: u32, iovs_len: u32) -> Result<u32> {
        let mut size = 0u32;
        let mut iov = iovs;
        for _ in 0..iovs_len {
            let buf = view.read32(iov)?;
            let len = view.read32(iov.wrapping_add(4))?;
            iov = iov.wrapping_add(8);

            let unread = &self.input[self.pos..];
            let n = unread.len().min(len as usize);
            if n == 0 {
                break;
            }
            view.write(buf, &unread[..n])?;
            size += n as u32;
            self.pos += n;
            if n != len as usize {
                break;
            }
        }
        Ok(size)
    }
}

/// Concatenate the text of `iovs_len` iovecs. Returns the text and the sum
/// of the iovec lengths.
pub fn gather_iovecs(view: &MemoryView<'_>, iovs: u32, iovs_len: u32) -> Result<(String, u32)> {
    let mut text = String::new();
    let mut size = 0u32;
    let mut iov = iovs;
    for _ in 0..iovs_len {
        let buf = view.read32(iov)?;
        let len = view.read32(iov.wrapping_add(4))?;
        iov = iov.wrapping_add(8);
        text.push_str(&view.read_str(buf, Some(len))?);
        size = size.wrapping_add(len);
    }
    Ok((text, size))
}

/// An instantiated filesystem module.
pub struct MemFs {
    instance: Instance,
    memory: GuestMemory,
    get_path_buf: Func,
    add_directory_node: Func,
    add_file_node: Func,
    get_file_node_address: Func,
    get_file_node_size: Func,
    find_node: Func,

    /// Every exported function, for merging into program imports.
    exports: Vec<(String, Func)>,
}

impl MemFs {
    /// Instantiate `module` into `store` and run its `init` export.
    pub fn instantiate(store: &mut Store<Session>, module: &Module) -> Result<Self> {
        let (memfs, init) = Self::attach(store, module)?;
        call(store, &init, &[])?;
        Ok(memfs)
    }

    /// Instantiate `module` into `store` as a copy of this filesystem.
    ///
    /// The new instance skips `init`; it gets this instance's memory bytes
    /// and the values of its exported mutable globals instead. Nothing may
    /// be executing in `from`.
    pub fn relocate(
        &self,
        from: &mut Store<Session>,
        store: &mut Store<Session>,
        module: &Module,
    ) -> Result<Self> {
        let (memfs, _) = Self::attach(store, module)?;
        let size = self.memory.size(&*from);
        memfs.memory.grow_to(&mut *store, size)?;
        let len = u32::try_from(size)
            .map_err(|_| Error::assertion("filesystem memory is too large to copy"))?;
        let bytes = self.memory.slice(&*from, 0, len)?;
        memfs.memory.view(&mut *store).write(0, bytes)?;

        let globals: Vec<_> = self
            .instance
            .exports(&mut *from)
            .filter_map(|export| {
                let name = export.name().to_string();
                export.into_global().map(|global| (name, global))
            })
            .collect();
        for (name, global) in globals {
            if !matches!(global.ty(&*from).mutability(), Mutability::Var) {
                continue;
            }
            let value = global.get(&mut *from);
            if !matches!(value, Val::I32(_) | Val::I64(_) | Val::F32(_) | Val::F64(_)) {
                continue;
            }
            if let Some(target) = memfs.instance.get_global(&mut *store, &name) {
                target.set(&mut *store, value)?;
            }
        }
        Ok(memfs)
    }

    /// Instantiate `module` and resolve its exports. Returns the `init`
    /// export alongside.
    fn attach(store: &mut Store<Session>, module: &Module) -> Result<(Self, Func)> {
        let mut linker = Linker::new(store.engine());
        define_host_imports(&mut linker)?;
        let instance = linker.instantiate(&mut *store, module)?;

        let memory = instance
            .get_memory(&mut *store, "memory")
            .map(GuestMemory::new)
            .ok_or_else(|| missing("memory"))?;
        store.data_mut().memfs_memory = Some(memory);

        let exports: Vec<(String, Func)> = instance
            .exports(&mut *store)
            .filter_map(|export| {
                let name = export.name().to_string();
                export.into_func().map(|func| (name, func))
            })
            .collect();
        let export = |name: &str| {
            exports
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, func)| *func)
                .ok_or_else(|| missing(name))
        };

        let memfs = Self {
            instance,
            memory,
            get_path_buf: export("GetPathBuf")?,
            add_directory_node: export("AddDirectoryNode")?,
            add_file_node: export("AddFileNode")?,
            get_file_node_address: export("GetFileNodeAddress")?,
            get_file_node_size: export("GetFileNodeSize")?,
            find_node: export("FindNode")?,
            exports: exports.clone(),
        };
        Ok((memfs, export("init")?))
    }

    pub fn memory(&self) -> GuestMemory {
        self.memory
    }

    pub fn add_directory(&self, store: &mut Store<Session>, path: &str) -> Result<()> {
        let len = self.write_path(store, path)?;
        call(store, &self.add_directory_node, &[Val::I32(len)])?;
        Ok(())
    }

    pub fn add_file(&self, store: &mut Store<Session>, path: &str, contents: &[u8]) -> Result<()> {
        let len = self.write_path(store, path)?;
        let size = i32::try_from(contents.len())
            .map_err(|_| Error::assertion(format!("`{path}` is too large")))?;
        let inode = call_i32(store, &self.add_file_node, &[Val::I32(len), Val::I32(size)])?;
        let addr = call_i32(store, &self.get_file_node_address, &[Val::I32(inode)])?;
        self.memory.view(&mut *store).write(addr as u32, contents)?;
        Ok(())
    }

    /// Look up the inode for `path`.
    pub fn find(&self, store: &mut Store<Session>, path: &str) -> Result<Option<i32>> {
        let len = self.write_path(store, path)?;
        let inode = call_i32(store, &self.find_node, &[Val::I32(len)])?;
        Ok((inode >= 0).then_some(inode))
    }

    /// Borrow a file's bytes inside memfs memory.
    pub fn file_contents<'a>(&self, store: &'a mut Store<Session>, path: &str) -> Result<&'a [u8]> {
        let inode = self
            .find(store, path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let addr = call_i32(store, &self.get_file_node_address, &[Val::I32(inode)])?;
        let size = call_i32(store, &self.get_file_node_size, &[Val::I32(inode)])?;
        let store: &'a Store<Session> = store;
        self.memory.slice(store, addr as u32, size as u32)
    }

    /// Populate the filesystem from a sysroot archive.
    pub fn untar(&self, store: &mut Store<Session>, archive: &[u8]) -> Result<usize> {
        let mut tree = Seeder { memfs: self, store };
        crate::tar::Archive::new(archive).untar(&mut tree)
    }

    /// Define every memfs export in a program's syscall namespace.
    ///
    /// Each wrapper first points the bridge at the calling program's memory,
    /// so callbacks into the host address the right process.
    pub(crate) fn link_syscalls(&self, store: &Store<Session>, linker: &mut Linker<Session>) -> Result<()> {
        for (name, func) in &self.exports {
            let func = *func;
            let ty = func.ty(store);
            linker.func_new(SYSCALL_MODULE, name, ty, move |mut caller, params, results| {
                let memory = caller_memory(&mut caller)?;
                caller.data_mut().host_memory = Some(memory);
                func.call(&mut caller, params, results)
            })?;
        }
        Ok(())
    }

    fn write_path(&self, store: &mut Store<Session>, path: &str) -> Result<i32> {
        let buf = call_i32(store, &self.get_path_buf, &[])?;
        let written = self.memory.view(&mut *store).write(buf as u32, &encode(path))?;
        Ok(written as i32)
    }
}

struct Seeder<'a> {
    memfs: &'a MemFs,
    store: &'a mut Store<Session>,
}

impl TreeBuilder for Seeder<'_> {
    fn add_directory(&mut self, path: &str) -> Result<()> {
        self.memfs.add_directory(self.store, path)
    }

    fn add_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        self.memfs.add_file(self.store, path, contents)
    }
}

fn missing(name: &str) -> Error {
    Error::MissingExport {
        module: "memfs".to_string(),
        name: name.to_string(),
    }
}

/// Call an export whose result, if any, is an `i32`.
fn call(store: &mut Store<Session>, func: &Func, params: &[Val]) -> Result<Option<i32>> {
    let mut results = vec![Val::I32(0); func.ty(&*store).results().len()];
    func.call(&mut *store, params, &mut results)?;
    Ok(results.first().and_then(Val::i32))
}

fn call_i32(store: &mut Store<Session>, func: &Func, params: &[Val]) -> Result<i32> {
    call(store, func, params)?
        .ok_or_else(|| Error::assertion("filesystem export returned no i32 result"))
}

type Host<'a> = Caller<'a, Session>;

fn define_host_imports(linker: &mut Linker<Session>) -> Result<()> {
    linker.func_wrap(MEMFS_MODULE, "abort", |_: Host<'_>| -> wasmtime::Result<()> {
        Err(Error::Abort.into_trap())
    })?;
    linker.func_wrap(MEMFS_MODULE, "host_write", host_write)?;
    linker.func_wrap(MEMFS_MODULE, "host_read", host_read)?;
    linker.func_wrap(MEMFS_MODULE, "memfs_log", memfs_log)?;
    linker.func_wrap(MEMFS_MODULE, "copy_in", copy_in)?;
    linker.func_wrap(MEMFS_MODULE, "copy_out", copy_out)?;
    Ok(())
}

fn host_write(mut caller: Host<'_>, fd: u32, iovs: u32, iovs_len: u32, out: u32) -> wasmtime::Result<i32> {
    write_output(&mut caller, fd, iovs, iovs_len, out).map_err(Error::into_trap)
}

fn write_output(caller: &mut Host<'_>, fd: u32, iovs: u32, iovs_len: u32, out: u32) -> Result<i32> {
    if fd > 2 {
        return Err(Error::assertion(format!("host_write to fd {fd}")));
    }
    let memory = caller.data().host_memory()?;
    let (mut view, session) = memory.view_with_data(caller);
    let (text, size) = gather_iovecs(&view, iovs, iovs_len)?;
    view.write32(out, size)?;
    session.write(&text);
    Ok(ESUCCESS)
}

fn host_read(mut caller: Host<'_>, fd: u32, iovs: u32, iovs_len: u32, out: u32) -> wasmtime::Result<i32> {
    read_input(&mut caller, fd, iovs, iovs_len, out).map_err(Error::into_trap)
}

fn read_input(caller: &mut Host<'_>, fd: u32, iovs: u32, iovs_len: u32, out: u32) -> Result<i32> {
    if fd != 0 {
        return Err(Error::assertion(format!("host_read from fd {fd}")));
    }
    let memory = caller.data().host_memory()?;
    let (mut view, session) = memory.view_with_data(caller);
    let size = session.stdin.read_into(&mut view, iovs, iovs_len)?;
    view.write32(out, size)?;
    Ok(ESUCCESS)
}

fn memfs_log(mut caller: Host<'_>, buf: u32, len: u32) -> wasmtime::Result<()> {
    let memory = caller.data().memfs_memory().map_err(Error::into_trap)?;
    let text = memory
        .view(&mut caller)
        .read_str(buf, Some(len))
        .map_err(Error::into_trap)?;
    tracing::info!(target: "memfs", "{text}");
    Ok(())
}

/// Copy `size` bytes from the calling program into memfs memory.
fn copy_in(mut caller: Host<'_>, memfs_dst: u32, src: u32, size: u32) -> wasmtime::Result<()> {
    copy(&mut caller, Direction::In, memfs_dst, src, size).map_err(Error::into_trap)
}

/// Copy `size` bytes from memfs memory into the calling program.
fn copy_out(mut caller: Host<'_>, dst: u32, memfs_src: u32, size: u32) -> wasmtime::Result<()> {
    copy(&mut caller, Direction::Out, dst, memfs_src, size).map_err(Error::into_trap)
}

enum Direction {
    In,
    Out,
}

fn copy(caller: &mut Host<'_>, direction: Direction, dst: u32, src: u32, size: u32) -> Result<()> {
    let host = caller.data().host_memory()?;
    let memfs = caller.data().memfs_memory()?;
    let (from, to) = match direction {
        Direction::In => (host, memfs),
        Direction::Out => (memfs, host),
    };
    let bytes = from.slice(&*caller, src, size)?.to_vec();
    to.view(caller).write(dst, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out iovecs at 0 pointing at buffers from 64 on.
    fn iovecs(view: &mut MemoryView<'_>, lens: &[u32]) {
        let mut buf = 64;
        for (i, len) in lens.iter().enumerate() {
            view.write32(i as u32 * 8, buf).unwrap();
            view.write32(i as u32 * 8 + 4, *len).unwrap();
            buf += len;
        }
    }

    #[test]
    fn read_stops_after_a_short_iovec() {
        let mut mem = vec![0u8; 256];
        let mut view = MemoryView::new(&mut mem);
        iovecs(&mut view, &[4, 4, 4]);

        let mut stdin = Stdin::new("abcdef");
        assert_eq!(stdin.read_into(&mut view, 0, 3).unwrap(), 6);
        assert_eq!(view.bytes(64, 6).unwrap(), b"abcdef");
        assert_eq!(stdin.remaining(), 0);

        // Exhausted input reads nothing.
        assert_eq!(stdin.read_into(&mut view, 0, 3).unwrap(), 0);
    }

    #[test]
    fn read_never_exceeds_input() {
        let mut mem = vec![0u8; 256];
        let mut view = MemoryView::new(&mut mem);
        iovecs(&mut view, &[3]);

        let mut stdin = Stdin::new("hello, world");
        let mut total = 0;
        loop {
            let n = stdin.read_into(&mut view, 0, 1).unwrap();
            assert!(n <= 3);
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 12);

        stdin.reset("x");
        assert_eq!(stdin.read_into(&mut view, 0, 1).unwrap(), 1);
        assert_eq!(view.read8(64).unwrap(), b'x');
    }

    #[test]
    fn gather_concatenates_iovecs() {
        let mut mem = vec![0u8; 256];
        let mut view = MemoryView::new(&mut mem);
        iovecs(&mut view, &[6, 6]);
        view.write(64, b"hello world!").unwrap();

        let (text, size) = gather_iovecs(&view, 0, 2).unwrap();
        assert_eq!(text, "hello world!");
        assert_eq!(size, 12);
    }

    #[test]
    fn gather_counts_full_length_past_a_zero_byte() {
        let mut mem = vec![0u8; 256];
        let mut view = MemoryView::new(&mut mem);
        iovecs(&mut view, &[5]);
        view.write(64, b"ab\0cd").unwrap();

        assert_eq!(gather_iovecs(&view, 0, 1).unwrap(), ("ab".to_string(), 5));
    }

    #[test]
    fn gather_decodes_bytes_split_across_iovecs() {
        let mut mem = vec![0u8; 256];
        let mut view = MemoryView::new(&mut mem);
        iovecs(&mut view, &[1, 3]);
        view.write(64, b"\xc3\xa9|\xe9").unwrap();

        let (text, size) = gather_iovecs(&view, 0, 2).unwrap();
        assert_eq!(text, "\u{c3}\u{a9}|\u{e9}");
        assert_eq!(size, 4);
    }
}
