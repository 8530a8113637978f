//! Shared fixtures for the integration tests.
//!
//! Stage modules are tiny WAT programs that stand in for the real compiler,
//! linker and assembler. They talk to the filesystem through the same
//! syscalls the real tools use, so the bridge is exercised end to end.

#![allow(dead_code)]

use std::sync::Arc;

use wasmbox_runtime::{Api, ApiOptions, BufferedOutput, MemoryLoader};

pub const MEMFS: &str = include_str!("../fixtures/memfs.wat");
pub const CLANG: &str = include_str!("../fixtures/clang.wat");
pub const LLD: &str = include_str!("../fixtures/lld.wat");
pub const VASM: &str = include_str!("../fixtures/vasm.wat");

pub const HELLO: &str = include_str!("../fixtures/hello.wat");
pub const EXIT3: &str = include_str!("../fixtures/exit3.wat");
pub const RETURNS: &str = include_str!("../fixtures/returns.wat");
pub const CLOCK: &str = include_str!("../fixtures/clock.wat");
pub const TRAP: &str = include_str!("../fixtures/trap.wat");
pub const ECHO: &str = include_str!("../fixtures/echo.wat");
pub const ENV: &str = include_str!("../fixtures/env.wat");
pub const CANVAS: &str = include_str!("../fixtures/canvas.wat");
pub const SPINNER: &str = include_str!("../fixtures/spinner.wat");
pub const FRAME_TRAP: &str = include_str!("../fixtures/frame_trap.wat");
pub const EXIT_AFTER_RAF: &str = include_str!("../fixtures/exit_after_raf.wat");
pub const FILL: &str = include_str!("../fixtures/fill.wat");

/// Contents of `lib/crt1.o` in the test sysroot.
pub const CRT1: &[u8; 37] = b"crt1.o: not a real object, 37 bytes.\n";

/// Build a GNU tar archive. Entries ending in `/` are directories.
pub fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        match path.strip_suffix('/') {
            Some(dir) => {
                header.set_path(dir).unwrap();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
            }
            None => {
                header.set_path(path).unwrap();
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(contents.len() as u64);
            }
        }
        header.set_cksum();
        builder.append(&header, *contents).unwrap();
    }
    builder.into_inner().unwrap()
}

/// The minimal sysroot: a `lib` directory holding a 37-byte `crt1.o`.
pub fn sysroot() -> Vec<u8> {
    archive(&[("lib/", &b""[..]), ("lib/crt1.o", &CRT1[..])])
}

/// Every resource the orchestrator loads by default.
pub fn loader() -> MemoryLoader {
    MemoryLoader::new()
        .with("memfs", MEMFS)
        .with("clang", CLANG)
        .with("lld", LLD)
        .with("vasm6502_oldstyle", VASM)
        .with("sysroot.tar", sysroot())
}

pub fn api_with(options: ApiOptions, loader: MemoryLoader) -> (Api, BufferedOutput) {
    let output = BufferedOutput::new();
    let api = Api::new(options, Box::new(loader), Arc::new(output.clone())).unwrap();
    (api, output)
}

/// An orchestrator over the default resources, with construction logs
/// already drained.
pub fn api() -> (Api, BufferedOutput) {
    let (api, output) = api_with(ApiOptions::default(), loader());
    output.take();
    (api, output)
}

/// Remove ANSI color escapes.
pub fn plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
