//! Error types for the wasmbox runtime.

use thiserror::Error;
use wasmtime::WasmBacktrace;

/// Errors that can occur while loading, seeding or running stage modules.
#[derive(Debug, Error)]
pub enum Error {
    /// The sandboxed program (or the filesystem module) called `abort`.
    #[error("abort")]
    Abort,

    /// A system call the shim deliberately leaves out was invoked.
    #[error("{module}.{field} not implemented.")]
    NotImplemented {
        module: &'static str,
        field: &'static str,
    },

    /// The filesystem bridge or archive loader hit a state it cannot
    /// handle, such as an unsupported archive entry.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A linear-memory access fell outside the memory.
    #[error("memory access out of bounds: {len} bytes at offset {offset} (memory is {size} bytes)")]
    OutOfBounds { offset: u64, len: u64, size: usize },

    /// The program exited with a code that signals failure.
    #[error("process exited with code {code}.")]
    Exit { code: i32 },

    /// The program trapped.
    #[error("{0}")]
    Trap(String),

    /// A module failed to compile, link or instantiate.
    #[error("wasm error: {0}")]
    Wasm(String),

    /// A module is missing an export the shim depends on.
    #[error("module `{module}` has no export named `{name}`")]
    MissingExport { module: String, name: String },

    /// A path has no node in the virtual filesystem.
    #[error("no such file: {0}")]
    NotFound(String),

    /// A named resource could not be read from the embedder's loader.
    #[error("failed to load resource `{name}`: {source}")]
    Resource {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        Error::Assertion(message.into())
    }

    /// Wrap this error so it can unwind out of a host function.
    pub(crate) fn into_trap(self) -> wasmtime::Error {
        wasmtime::Error::new(self)
    }
}

impl From<wasmtime::Error> for Error {
    fn from(err: wasmtime::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(err) if err.downcast_ref::<WasmBacktrace>().is_some() => {
                Error::Trap(err.root_cause().to_string())
            }
            Err(err) => Error::Wasm(format!("{err:#}")),
        }
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_errors_survive_the_trap_boundary() {
        let trap = Error::NotImplemented {
            module: "wasi_unstable",
            field: "clock_time_get",
        }
        .into_trap();

        let err = Error::from(trap);
        assert!(matches!(
            err,
            Error::NotImplemented {
                field: "clock_time_get",
                ..
            }
        ));
        assert_eq!(err.to_string(), "wasi_unstable.clock_time_get not implemented.");
    }

    #[test]
    fn foreign_errors_become_wasm_errors() {
        let err = Error::from(wasmtime::Error::msg("unknown import"));
        assert!(matches!(err, Error::Wasm(ref msg) if msg.contains("unknown import")));
    }

    #[test]
    fn exit_message_carries_code() {
        assert_eq!(
            Error::Exit { code: 3 }.to_string(),
            "process exited with code 3."
        );
    }
}
