//! State shared by every module instantiated into one orchestrator's store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;
use wasmtime::{Func, ResourceLimiter};

use crate::canvas::{DrawingSurface, HandleTable};
use crate::error::{Error, Result};
use crate::memfs::Stdin;
use crate::memory::GuestMemory;
use crate::output::HostOutput;

/// Unique identifier for a Process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// Create a new random ProcessId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-process state the host functions need.
pub struct ProcessSlot {
    /// Program name followed by its arguments.
    pub argv: Vec<String>,

    /// Environment, in the order it is serialized.
    pub environ: Vec<(String, String)>,

    /// Image data created through the drawing-surface imports.
    pub handles: HandleTable,

    /// Whether the process may keep receiving animation-frame callbacks.
    pub continuation: Arc<AtomicBool>,
}

impl ProcessSlot {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            environ: vec![("USER".to_string(), "alice".to_string())],
            handles: HandleTable::default(),
            continuation: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// A scheduled call into a program's `canvas_loop` export.
///
/// The continuation flag is captured when the frame is requested; the frame
/// is dropped if the flag has been cleared by the time it fires.
pub struct FrameRequest {
    pub process: ProcessId,
    pub callback: Func,
    pub continuation: Arc<AtomicBool>,
}

impl FrameRequest {
    pub fn is_live(&self) -> bool {
        self.continuation.load(Ordering::Acquire)
    }
}

/// Linear memories created in one store, and the bytes they hold.
///
/// A store frees its instances only when it is dropped, so these counts
/// only fall when the orchestrator moves into a fresh store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub memories: usize,
    pub bytes: usize,
}

impl ResourceLimiter for Footprint {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if current == 0 {
            self.memories += 1;
        }
        self.bytes += desired.saturating_sub(current);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        _desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(true)
    }
}

/// Data owned by the orchestrator's store.
pub struct Session {
    pub output: Arc<dyn HostOutput>,
    pub stdin: Stdin,

    /// The filesystem module's memory, once it is instantiated.
    pub memfs_memory: Option<GuestMemory>,

    /// Memory of the process whose syscall is currently executing.
    pub host_memory: Option<GuestMemory>,

    pub surface: Option<Box<dyn DrawingSurface>>,
    pub processes: HashMap<ProcessId, ProcessSlot>,
    pub frames: Vec<FrameRequest>,
    pub footprint: Footprint,
}

impl Session {
    pub fn new(output: Arc<dyn HostOutput>) -> Self {
        Self {
            output,
            stdin: Stdin::default(),
            memfs_memory: None,
            host_memory: None,
            surface: None,
            processes: HashMap::new(),
            frames: Vec::new(),
            footprint: Footprint::default(),
        }
    }

    pub fn write(&self, text: &str) {
        self.output.write(text);
    }

    pub fn process(&self, id: ProcessId) -> Result<&ProcessSlot> {
        self.processes
            .get(&id)
            .ok_or_else(|| Error::assertion(format!("unknown process {id}")))
    }

    pub fn process_mut(&mut self, id: ProcessId) -> Result<&mut ProcessSlot> {
        self.processes
            .get_mut(&id)
            .ok_or_else(|| Error::assertion(format!("unknown process {id}")))
    }

    pub(crate) fn memfs_memory(&self) -> Result<GuestMemory> {
        self.memfs_memory
            .ok_or_else(|| Error::assertion("filesystem module is not instantiated"))
    }

    pub(crate) fn host_memory(&self) -> Result<GuestMemory> {
        self.host_memory
            .ok_or_else(|| Error::assertion("no process memory is attached"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BufferedOutput;

    #[test]
    fn process_ids_are_unique_and_display_as_uuids() {
        let a = ProcessId::new();
        let b = ProcessId::default();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn new_slots_allow_continuation_and_carry_the_fixed_environment() {
        let slot = ProcessSlot::new(vec!["clang".into(), "-cc1".into()]);
        assert!(slot.continuation.load(Ordering::Acquire));
        assert_eq!(slot.environ, vec![("USER".into(), "alice".into())]);
        assert!(slot.handles.is_empty());
    }

    #[test]
    fn footprint_counts_created_memories_and_growth() {
        let mut footprint = Footprint::default();
        assert!(footprint.memory_growing(0, 65536, None).unwrap());
        assert!(footprint.memory_growing(65536, 131072, None).unwrap());
        assert!(footprint.memory_growing(0, 65536, Some(65536)).unwrap());
        assert_eq!(
            footprint,
            Footprint {
                memories: 2,
                bytes: 196608
            }
        );
    }

    #[test]
    fn unknown_process_lookup_fails() {
        let mut session = Session::new(Arc::new(BufferedOutput::new()));
        assert!(matches!(
            session.process_mut(ProcessId::new()),
            Err(Error::Assertion(_))
        ));
        assert!(session.memfs_memory().is_err());
        assert!(session.host_memory().is_err());
    }
}
